//! Column storage flavours for encrypted payloads.
//!
//! BLOB columns hold `nonce || ciphertext || tag` as raw bytes. TEXT
//! columns hold the same bytes base64-encoded, except that the no-op
//! encryptor leaves the plaintext as-is so unencrypted rows stay readable.

use crate::crypto::Encryptor;
use crate::error::CryptoError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnFormat {
    Blob,
    Text,
}

/// A value as it sits in (or is bound to) a protected column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    Blob(Vec<u8>),
    Text(String),
}

/// Encrypt `plaintext` for a column of the given format.
pub fn seal(
    encryptor: &Encryptor,
    format: ColumnFormat,
    plaintext: &[u8],
) -> Result<ColumnValue, CryptoError> {
    match format {
        ColumnFormat::Blob => encryptor.encrypt(plaintext).map(ColumnValue::Blob),
        ColumnFormat::Text => encryptor.encrypt_text(plaintext).map(ColumnValue::Text),
    }
}

/// Decrypt a stored column value.
pub fn open(encryptor: &Encryptor, value: &ColumnValue) -> Result<Vec<u8>, CryptoError> {
    match value {
        ColumnValue::Blob(b) => encryptor.decrypt(b),
        ColumnValue::Text(t) => encryptor.decrypt_text(t),
    }
}
