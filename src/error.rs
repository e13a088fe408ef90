use std::fmt;

use thiserror::Error;

/// Failures of a single encrypt or decrypt call.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Input is shorter than the AEAD nonce.
    #[error("malformed ciphertext")]
    MalformedCiphertext,

    /// Tag mismatch: wrong key or tampered data.
    #[error("message authentication failed")]
    AuthFailed,

    #[error("invalid ciphertext encoding: {0}")]
    InvalidEncoding(String),

    #[error("encryption failed")]
    SealFailed,

    #[error("OS random generator unavailable")]
    Random,
}

/// A single field-level validation failure in the password configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub reason: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.reason, self.path)
    }
}

/// All validation failures found in one pass, in entry order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(pub Vec<FieldError>);

impl FieldErrors {
    pub fn push(&mut self, path: impl Into<String>, reason: impl Into<String>) {
        self.0.push(FieldError {
            path: path.into(),
            reason: reason.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldError> {
        self.0.iter()
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password configuration string could not be parsed as JSON: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("password configuration type error, expected string or object array, got {0}")]
    Type(&'static str),

    #[error("password configuration error: {0}")]
    Validation(FieldErrors),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Password(#[from] PasswordError),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cannot create database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot find metadata for password labelled {0:?}")]
    UnknownLabel(String),
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Password(#[from] PasswordError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("encryption is enabled but no primary password is set; mark one of the passwords as primary")]
    MissingPrimary,

    #[error("encryption is disabled but a primary password is set; mark the password as non-primary")]
    UnexpectedPrimary,

    #[error("canary mismatch for password labelled {label:?} - check that the password value has not changed")]
    CanaryMismatch { label: String },

    #[error("encryption canary error for password labelled {label:?}: {source}")]
    Canary {
        label: String,
        #[source]
        source: CryptoError,
    },

    #[error("the password labelled {label:?} must be supplied to decrypt the database")]
    MissingPriorPrimary { label: String },

    #[error(
        "corrupt database - more than one primary found in table password_metadata; mark only one as primary but do not remove rows"
    )]
    CorruptMetadata,

    #[error("failed to seal canary for password labelled {label:?}: {source}")]
    Crypto {
        label: String,
        #[source]
        source: CryptoError,
    },
}

/// A protected column that could not be read with the supplied encryptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordError {
    pub table: &'static str,
    pub id: String,
    pub cause: CryptoError,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "decode error for {} {:?}: {}", self.table, self.id, self.cause)
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

#[derive(Debug, Error)]
pub enum RecordStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Crypto(#[from] RecordError),

    #[error("invalid JSON in {table} row {id:?}: {source}")]
    Json {
        table: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ReencryptError {
    #[error("cannot decrypt {table} row {id:?}: {source}; supply the password that encrypted it")]
    Decrypt {
        table: &'static str,
        id: String,
        #[source]
        source: CryptoError,
    },

    #[error("cannot encrypt {table} row {id:?}: {source}")]
    Encrypt {
        table: &'static str,
        id: String,
        #[source]
        source: CryptoError,
    },

    #[error("error reencrypting {table}: {source}")]
    Database {
        table: &'static str,
        #[source]
        source: sqlx::Error,
    },

    #[error("reencryption interrupted before {table}; completed batches are committed")]
    Interrupted { table: &'static str },

    #[error("{} protected fields cannot be read: {}", .0.len(), join_records(.0))]
    Unreadable(Vec<RecordError>),
}

fn join_records(errors: &[RecordError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("upgrade request error: {0}")]
    Request(String),

    /// The platform reported the update as failed; carries its description verbatim.
    #[error("{description}")]
    Failed { description: String },

    #[error("upgrade request timeout")]
    Timeout,

    #[error("{0}")]
    Discovery(String),

    #[error("{0}")]
    InvalidInput(String),
}
