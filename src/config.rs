//! Encryption options from flags, environment and an optional JSON file.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ConfigError;
use crate::passwords::{self, PasswordEntry};

/// `{"encryption":{"enabled":bool,"keys":<string-or-array>}}`
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub encryption: EncryptionSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct EncryptionSection {
    pub enabled: Option<bool>,
    #[serde(default)]
    pub keys: Value,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Resolved encryption options.
#[derive(Debug, Clone, Default)]
pub struct EncryptionSettings {
    pub enabled: bool,
    pub passwords: Vec<PasswordEntry>,
}

impl EncryptionSettings {
    /// Merge sources. `enabled` and `passwords` are the flag-or-environment
    /// values; each falls back to the config file, then to "disabled, no
    /// passwords".
    pub fn resolve(
        enabled: Option<bool>,
        passwords: Option<&str>,
        file: Option<&ConfigFile>,
    ) -> Result<Self, ConfigError> {
        let section = file.map(|f| &f.encryption);

        let enabled = enabled
            .or_else(|| section.and_then(|s| s.enabled))
            .unwrap_or(false);

        let passwords = match (passwords, section) {
            (Some(raw), _) => passwords::parse(raw)?,
            (None, Some(s)) => passwords::parse_value(s.keys.clone())?,
            (None, None) => Vec::new(),
        };

        Ok(Self { enabled, passwords })
    }
}
