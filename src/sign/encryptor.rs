//! Encryption of stored secrets (certificate passwords) with key rotation.

use std::collections::HashMap;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;

use crate::config::Secret;
use crate::core::FiscalError;

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("unknown key id {0}")]
    UnknownKey(String),
    #[error("malformed ciphertext: {0}")]
    Malformed(String),
    #[error("authentication or decryption failed")]
    Decryption,
    #[error("encryption failed")]
    Encryption,
}

impl From<CryptoError> for FiscalError {
    fn from(err: CryptoError) -> Self {
        FiscalError::InvalidCertificate(format!("certificate password: {err}"))
    }
}

/// Encrypts secrets for storage and decrypts them on use.
pub trait Encryptor: Send + Sync {
    fn encrypt(&self, plaintext: &Secret) -> Result<String, CryptoError>;
    fn decrypt(&self, ciphertext: &str) -> Result<Secret, CryptoError>;
}

/// AES-256-GCM with named keys.
///
/// Ciphertext is `<key-id>:<base64(nonce ‖ ciphertext ‖ tag)>`. New values
/// are always written with the active key; older key ids keep decrypting
/// until they are removed.
pub struct AesGcmEncryptor {
    active: String,
    keys: HashMap<String, Key<Aes256Gcm>>,
}

impl std::fmt::Debug for AesGcmEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.keys.keys().collect();
        ids.sort();
        f.debug_struct("AesGcmEncryptor")
            .field("active", &self.active)
            .field("key_ids", &ids)
            .finish()
    }
}

impl AesGcmEncryptor {
    /// Start with a single 32-byte key.
    pub fn new(key_id: impl Into<String>, key: [u8; 32]) -> Self {
        let key_id = key_id.into();
        let mut keys = HashMap::new();
        keys.insert(key_id.clone(), Key::<Aes256Gcm>::from(key));
        Self {
            active: key_id,
            keys,
        }
    }

    /// Start from a base64-encoded 32-byte key.
    pub fn from_base64(key_id: impl Into<String>, key_b64: &str) -> Result<Self, CryptoError> {
        let bytes = STANDARD
            .decode(key_b64.trim())
            .map_err(|e| CryptoError::Malformed(format!("key: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CryptoError::Malformed("key must be 32 bytes".into()))?;
        Ok(Self::new(key_id, key))
    }

    /// Add `key` and make it the one used for new ciphertexts.
    pub fn rotate(mut self, key_id: impl Into<String>, key: [u8; 32]) -> Self {
        let key_id = key_id.into();
        self.keys.insert(key_id.clone(), Key::<Aes256Gcm>::from(key));
        self.active = key_id;
        self
    }

    /// Forget a retired key.
    pub fn retire(&mut self, key_id: &str) {
        if key_id != self.active {
            self.keys.remove(key_id);
        }
    }

    pub fn active_key_id(&self) -> &str {
        &self.active
    }
}

impl Encryptor for AesGcmEncryptor {
    fn encrypt(&self, plaintext: &Secret) -> Result<String, CryptoError> {
        let key = self
            .keys
            .get(&self.active)
            .ok_or_else(|| CryptoError::UnknownKey(self.active.clone()))?;
        let cipher = Aes256Gcm::new(key);

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.expose().as_bytes())
            .map_err(|_| CryptoError::Encryption)?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);
        Ok(format!("{}:{}", self.active, STANDARD.encode(&combined)))
    }

    fn decrypt(&self, ciphertext: &str) -> Result<Secret, CryptoError> {
        let (key_id, payload) = ciphertext
            .split_once(':')
            .ok_or_else(|| CryptoError::Malformed("missing key id".into()))?;
        let key = self
            .keys
            .get(key_id)
            .ok_or_else(|| CryptoError::UnknownKey(key_id.to_string()))?;

        let combined = STANDARD
            .decode(payload)
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;
        if combined.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Malformed("ciphertext too short".into()));
        }
        let (nonce_bytes, body) = combined.split_at(NONCE_LEN);

        let plaintext = Aes256Gcm::new(key)
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|_| CryptoError::Decryption)?;
        String::from_utf8(plaintext)
            .map(Secret::new)
            .map_err(|_| CryptoError::Malformed("plaintext is not UTF-8".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_and_format() {
        let enc = AesGcmEncryptor::new("k1", [7u8; 32]);
        let stored = enc.encrypt(&Secret::new("clave-firma")).unwrap();
        assert!(stored.starts_with("k1:"));
        assert!(!stored.contains("clave-firma"));
        assert_eq!(enc.decrypt(&stored).unwrap().expose(), "clave-firma");
    }

    #[test]
    fn rotation_keeps_old_ciphertexts_readable() {
        let old = AesGcmEncryptor::new("k1", [1u8; 32]);
        let stored = old.encrypt(&Secret::new("s3cret")).unwrap();

        let rotated = AesGcmEncryptor::new("k1", [1u8; 32]).rotate("k2", [2u8; 32]);
        assert_eq!(rotated.active_key_id(), "k2");
        assert_eq!(rotated.decrypt(&stored).unwrap().expose(), "s3cret");
        assert!(rotated.encrypt(&Secret::new("x")).unwrap().starts_with("k2:"));

        let mut retired = rotated;
        retired.retire("k1");
        assert!(matches!(
            retired.decrypt(&stored),
            Err(CryptoError::UnknownKey(_))
        ));
    }

    #[test]
    fn tampering_is_detected() {
        let enc = AesGcmEncryptor::new("k1", [9u8; 32]);
        let stored = enc.encrypt(&Secret::new("value")).unwrap();
        let (id, payload) = stored.split_once(':').unwrap();
        let mut bytes = STANDARD.decode(payload).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = format!("{id}:{}", STANDARD.encode(bytes));
        assert!(matches!(enc.decrypt(&tampered), Err(CryptoError::Decryption)));
    }
}
