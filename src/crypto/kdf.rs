use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use super::{KEY_LEN, MIN_SECRET_LEN, PBKDF2_ROUNDS, SALT_LEN};

/// Derive a 256-bit key from a configured secret and its stored salt.
///
/// # Panics
///
/// A secret shorter than 20 bytes or a salt that is not 32 bytes is a
/// programming error: the password parser and metadata store never
/// produce either.
pub fn derive_key(secret: &str, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    assert!(
        secret.len() >= MIN_SECRET_LEN,
        "invalid secret complexity for key generation"
    );
    assert!(
        salt.len() == SALT_LEN,
        "invalid salt complexity for key generation"
    );

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), salt, PBKDF2_ROUNDS, &mut key[..]);
    key
}
