use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use panel_common::error::{Error, ErrorKind, Result};

const NONCE_LEN: usize = 12;

/// AES-256-GCM at rest for SSH passwords. Ciphertext layout is
/// `nonce || tag+body`, so a single byte blob round-trips through
/// storage without a separate nonce column.
pub struct Encryptor {
    cipher: Aes256Gcm,
}

impl Encryptor {
    pub fn new(key: [u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(&key);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| Error::custom(ErrorKind::Fatal, format!("encrypt failed: {e}")))?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(nonce.as_slice());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt(&self, blob: &[u8]) -> Result<String> {
        if blob.len() < NONCE_LEN {
            return Err(Error::custom(ErrorKind::Fatal, "ciphertext too short"));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::custom(ErrorKind::Fatal, format!("decrypt failed: {e}")))?;
        String::from_utf8(plaintext).map_err(|e| Error::custom(ErrorKind::Fatal, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let enc = Encryptor::new([7u8; 32]);
        let blob = enc.encrypt("hunter2").unwrap();
        assert_eq!(enc.decrypt(&blob).unwrap(), "hunter2");
    }

    #[test]
    fn distinct_ciphertexts_for_same_plaintext() {
        let enc = Encryptor::new([7u8; 32]);
        let a = enc.encrypt("hunter2").unwrap();
        let b = enc.encrypt("hunter2").unwrap();
        assert_ne!(a, b, "nonce must differ per encryption");
    }
}
