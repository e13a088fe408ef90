//! Configured encryption passwords.

pub mod canary;
pub mod parser;

pub use canary::{CANARY_INPUT, check_canary, seal_canary};
pub use parser::{PasswordEntry, parse, parse_value};
