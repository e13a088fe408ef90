use crate::crypto::Encryptor;
use crate::error::{CryptoError, ReconcileError};

/// Known plaintext sealed under each password's key and stored next to
/// its salt. The fresh nonce per seal rules out precomputed lookups.
pub const CANARY_INPUT: &str = "canary value";

pub fn seal_canary(encryptor: &Encryptor) -> Result<Vec<u8>, CryptoError> {
    encryptor.encrypt(CANARY_INPUT.as_bytes())
}

/// Prove that `encryptor` holds the key the canary was sealed with.
pub fn check_canary(
    encryptor: &Encryptor,
    canary: &[u8],
    label: &str,
) -> Result<(), ReconcileError> {
    match encryptor.decrypt(canary) {
        Ok(_) => Ok(()),
        Err(CryptoError::AuthFailed | CryptoError::MalformedCiphertext) => {
            Err(ReconcileError::CanaryMismatch {
                label: label.to_string(),
            })
        }
        Err(source) => Err(ReconcileError::Canary {
            label: label.to_string(),
            source,
        }),
    }
}
