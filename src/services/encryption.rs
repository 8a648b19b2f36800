use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use base64::Engine;

/// AES-256-GCM encryption service for stored session credentials.
///
/// Secrets never touch the relational store in plaintext; the encrypted
/// form is base64 of nonce (12 bytes) followed by ciphertext.
pub struct EncryptionService {
    cipher: Aes256Gcm,
}

impl EncryptionService {
    /// Create from a base64-encoded 32-byte key.
    pub fn new(key_base64: &str) -> Result<Self, EncryptionError> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(key_base64)
            .map_err(|_| EncryptionError::InvalidKey)?;

        if key_bytes.len() != 32 {
            return Err(EncryptionError::InvalidKey);
        }

        let cipher =
            Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| EncryptionError::InvalidKey)?;

        Ok(Self { cipher })
    }

    /// Encrypt a secret for storage in a text column.
    pub fn encrypt_secret(&self, secret: &str) -> Result<String, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, secret.as_bytes())
            .map_err(|_| EncryptionError::EncryptFailed)?;

        let mut output = nonce.to_vec();
        output.extend(ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(output))
    }

    /// Decrypt a stored secret.
    pub fn decrypt_secret(&self, stored: &str) -> Result<String, EncryptionError> {
        let data = base64::engine::general_purpose::STANDARD
            .decode(stored)
            .map_err(|_| EncryptionError::DecryptFailed)?;

        if data.len() < 12 {
            return Err(EncryptionError::DecryptFailed);
        }

        let (nonce_bytes, ciphertext) = data.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| EncryptionError::DecryptFailed)?;

        String::from_utf8(plaintext).map_err(|_| EncryptionError::DecryptFailed)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EncryptionError {
    #[error("Invalid encryption key (must be 32 bytes, base64-encoded)")]
    InvalidKey,

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed")]
    DecryptFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> EncryptionService {
        let key = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        EncryptionService::new(&key).unwrap()
    }

    #[test]
    fn test_secret_round_trip() {
        let service = service();
        let stored = service.encrypt_secret("hunter2").unwrap();
        assert_ne!(stored, "hunter2");
        assert_eq!(service.decrypt_secret(&stored).unwrap(), "hunter2");
    }

    #[test]
    fn test_rejects_short_key() {
        let key = base64::engine::general_purpose::STANDARD.encode([0u8; 16]);
        assert!(matches!(
            EncryptionService::new(&key),
            Err(EncryptionError::InvalidKey)
        ));
    }

    #[test]
    fn test_rejects_tampered_ciphertext() {
        let service = service();
        let stored = service.encrypt_secret("hunter2").unwrap();
        let mut raw = base64::engine::general_purpose::STANDARD.decode(&stored).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        let tampered = base64::engine::general_purpose::STANDARD.encode(raw);
        assert!(service.decrypt_secret(&tampered).is_err());
    }
}
