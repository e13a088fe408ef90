//! The encryptor variants protected columns are read and written through.

use std::fmt;
use std::sync::Arc;

use base64::{Engine, engine::general_purpose::STANDARD};
use zeroize::Zeroizing;

use super::{AeadCipher, KEY_LEN};
use crate::error::CryptoError;

/// Encrypts and decrypts column payloads.
///
/// Cheap to clone: an AEAD variant owns a copy of its derived key, a
/// compound shares its constituents.
#[derive(Clone)]
pub enum Encryptor {
    /// AES-256-GCM under the key derived for one password label.
    Aead { label: String, cipher: AeadCipher },
    /// Identity; used when encryption is disabled.
    NoOp,
    /// Encrypts with one encryptor, decrypts with the first of several that succeeds.
    Compound(Arc<CompoundEncryptor>),
}

/// Encrypting side and ranked decrypting side of a rotation.
pub struct CompoundEncryptor {
    encryptor: Encryptor,
    decryptors: Vec<Encryptor>,
}

impl CompoundEncryptor {
    pub fn encryptor(&self) -> &Encryptor {
        &self.encryptor
    }

    pub fn decryptors(&self) -> &[Encryptor] {
        &self.decryptors
    }

    fn decrypt_with<F>(&self, mut open: F) -> Result<Vec<u8>, CryptoError>
    where
        F: FnMut(&Encryptor) -> Result<Vec<u8>, CryptoError>,
    {
        let mut last = CryptoError::AuthFailed;
        for decryptor in &self.decryptors {
            match open(decryptor) {
                Ok(plaintext) => return Ok(plaintext),
                Err(e) => last = e,
            }
        }
        Err(last)
    }
}

impl Encryptor {
    pub fn aead(label: impl Into<String>, key: Zeroizing<[u8; KEY_LEN]>) -> Self {
        Encryptor::Aead {
            label: label.into(),
            cipher: AeadCipher::new(key),
        }
    }

    pub fn noop() -> Self {
        Encryptor::NoOp
    }

    pub fn compound(encryptor: Encryptor, decryptors: Vec<Encryptor>) -> Self {
        Encryptor::Compound(Arc::new(CompoundEncryptor {
            encryptor,
            decryptors,
        }))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            Encryptor::Aead { cipher, .. } => cipher.encrypt(plaintext),
            Encryptor::NoOp => Ok(plaintext.to_vec()),
            Encryptor::Compound(c) => c.encryptor.encrypt(plaintext),
        }
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        match self {
            Encryptor::Aead { cipher, .. } => cipher.decrypt(ciphertext),
            Encryptor::NoOp => Ok(ciphertext.to_vec()),
            Encryptor::Compound(c) => c.decrypt_with(|d| d.decrypt(ciphertext)),
        }
    }

    /// Text-column flavour: AEAD output is base64, no-op output is the plaintext itself.
    pub fn encrypt_text(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        match self {
            Encryptor::Aead { cipher, .. } => Ok(STANDARD.encode(cipher.encrypt(plaintext)?)),
            Encryptor::NoOp => String::from_utf8(plaintext.to_vec())
                .map_err(|e| CryptoError::InvalidEncoding(e.to_string())),
            Encryptor::Compound(c) => c.encryptor.encrypt_text(plaintext),
        }
    }

    pub fn decrypt_text(&self, ciphertext: &str) -> Result<Vec<u8>, CryptoError> {
        match self {
            Encryptor::Aead { cipher, .. } => {
                let raw = STANDARD
                    .decode(ciphertext)
                    .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
                cipher.decrypt(&raw)
            }
            Encryptor::NoOp => Ok(ciphertext.as_bytes().to_vec()),
            Encryptor::Compound(c) => c.decrypt_with(|d| d.decrypt_text(ciphertext)),
        }
    }

    /// Password label for AEAD encryptors.
    pub fn label(&self) -> Option<&str> {
        match self {
            Encryptor::Aead { label, .. } => Some(label.as_str()),
            _ => None,
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self, Encryptor::NoOp)
    }

    pub fn as_compound(&self) -> Option<&CompoundEncryptor> {
        match self {
            Encryptor::Compound(c) => Some(c),
            _ => None,
        }
    }

    /// Key-free description, e.g. `compound(aead:new; aead:new, aead:old, noop)`.
    pub fn describe(&self) -> String {
        match self {
            Encryptor::Aead { label, .. } => format!("aead:{label}"),
            Encryptor::NoOp => "noop".to_string(),
            Encryptor::Compound(c) => {
                let decryptors = c
                    .decryptors
                    .iter()
                    .map(Encryptor::describe)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("compound({}; {})", c.encryptor.describe(), decryptors)
            }
        }
    }
}

impl fmt::Debug for Encryptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Encryptor({})", self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aead(label: &str, byte: u8) -> Encryptor {
        Encryptor::aead(label, Zeroizing::new([byte; KEY_LEN]))
    }

    #[test]
    fn noop_is_identity() {
        let e = Encryptor::noop();
        assert_eq!(e.encrypt(b"plain").unwrap(), b"plain");
        assert_eq!(e.decrypt(b"plain").unwrap(), b"plain");
        assert_eq!(e.encrypt_text(b"plain").unwrap(), "plain");
        assert_eq!(e.decrypt_text("plain").unwrap(), b"plain");
    }

    #[test]
    fn aead_text_flavour_is_base64() {
        let e = aead("current", 1);
        let text = e.encrypt_text(b"{}").unwrap();
        let raw = STANDARD.decode(&text).unwrap();
        assert_eq!(e.decrypt(&raw).unwrap(), b"{}");
        assert_eq!(e.decrypt_text(&text).unwrap(), b"{}");
    }

    #[test]
    fn aead_text_rejects_bad_base64() {
        let e = aead("current", 1);
        assert!(matches!(
            e.decrypt_text("not base64!"),
            Err(CryptoError::InvalidEncoding(_))
        ));
    }

    #[test]
    fn compound_encrypts_with_primary_only() {
        let new = aead("new-key", 1);
        let old = aead("old-key", 2);
        let c = Encryptor::compound(new.clone(), vec![new.clone(), old.clone()]);

        let sealed = c.encrypt(b"data").unwrap();
        assert_eq!(new.decrypt(&sealed).unwrap(), b"data");
        assert_eq!(old.decrypt(&sealed), Err(CryptoError::AuthFailed));
    }

    #[test]
    fn compound_falls_through_to_older_key() {
        let new = aead("new-key", 1);
        let old = aead("old-key", 2);
        let c = Encryptor::compound(new.clone(), vec![new, old.clone()]);

        let legacy = old.encrypt(b"legacy").unwrap();
        assert_eq!(c.decrypt(&legacy).unwrap(), b"legacy");
    }

    #[test]
    fn compound_returns_first_success() {
        // no-op ranked first always "succeeds", even on real ciphertext
        let key = aead("some-key", 1);
        let c = Encryptor::compound(key.clone(), vec![Encryptor::noop(), key.clone()]);

        let sealed = key.encrypt(b"data").unwrap();
        assert_eq!(c.decrypt(&sealed).unwrap(), sealed);
    }

    #[test]
    fn compound_reports_last_decryptor_error() {
        // an empty compound fails with AuthFailed, an AEAD on short input with MalformedCiphertext
        let empty = Encryptor::compound(Encryptor::noop(), Vec::new());
        let key = aead("aaaaa", 1);

        let c = Encryptor::compound(key.clone(), vec![key.clone(), empty.clone()]);
        assert_eq!(c.decrypt(&[0u8; 4]), Err(CryptoError::AuthFailed));

        let c = Encryptor::compound(key.clone(), vec![empty, key]);
        assert_eq!(c.decrypt(&[0u8; 4]), Err(CryptoError::MalformedCiphertext));
    }

    #[test]
    fn compound_with_trailing_noop_reads_plaintext() {
        let key = aead("first", 1);
        let c = Encryptor::compound(key.clone(), vec![key.clone(), Encryptor::noop()]);

        assert_eq!(c.decrypt(b"{\"plain\":true}").unwrap(), b"{\"plain\":true}");
        assert_eq!(c.decrypt_text("{\"plain\":true}").unwrap(), b"{\"plain\":true}");
    }

    #[test]
    fn compound_encrypt_failure_does_not_consult_decryptors() {
        // no-op text encryption of invalid UTF-8 fails; the AEAD decryptor must not step in
        let c = Encryptor::compound(Encryptor::noop(), vec![aead("first", 1)]);
        assert!(c.encrypt_text(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn describe_hides_keys() {
        let key = aead("barfoo", 1);
        let c = Encryptor::compound(key.clone(), vec![key, Encryptor::noop()]);
        assert_eq!(c.describe(), "compound(aead:barfoo; aead:barfoo, noop)");
        assert_eq!(format!("{c:?}"), "Encryptor(compound(aead:barfoo; aead:barfoo, noop))");
    }
}
