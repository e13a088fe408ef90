//! Cryptographic primitives for encrypted columns.
//!
//! Provides the AES-256-GCM cipher, PBKDF2 key derivation, and the
//! encryptor variants the rest of the crate is written against.

pub mod aead;
pub mod encryptor;
pub mod kdf;

pub use aead::{AeadCipher, generate_salt};
pub use encryptor::{CompoundEncryptor, Encryptor};
pub use kdf::derive_key;

/// Length of the per-password salt (32 bytes).
pub const SALT_LEN: usize = 32;
/// Length of the nonce (12 bytes for AES-GCM).
pub const NONCE_LEN: usize = 12;
/// Length of the encryption key (32 bytes / 256 bits).
pub const KEY_LEN: usize = 32;
/// Length of the GCM authentication tag.
pub const TAG_LEN: usize = 16;
/// PBKDF2-HMAC-SHA256 iteration count.
pub const PBKDF2_ROUNDS: u32 = 100_000;
/// Shortest secret the key deriver accepts.
pub const MIN_SECRET_LEN: usize = 20;
