//! Sealing of integration settings at rest.
//!
//! AES-256-GCM with a key derived per provider via HKDF-SHA256 from one
//! master key. A sealed blob is `nonce || ciphertext || tag`.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use sha2::Sha256;

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;
const TAG_LENGTH: usize = 16;

const HKDF_INFO: &[u8] = b"opsdash-integration-settings-v1";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("Invalid master key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Settings are not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Seals and opens per-provider settings blobs.
#[derive(Clone)]
pub struct ConfigCipher {
    master_key: [u8; KEY_LENGTH],
}

impl ConfigCipher {
    pub fn new(master_key: [u8; KEY_LENGTH]) -> Self {
        Self { master_key }
    }

    /// Accepts a 32-byte key as base64 or hex.
    pub fn from_encoded(encoded: &str) -> Result<Self, CryptoError> {
        use base64::{engine::general_purpose::STANDARD, Engine};

        let trimmed = encoded.trim();
        let bytes = match STANDARD.decode(trimmed) {
            Ok(bytes) if bytes.len() == KEY_LENGTH => bytes,
            _ => hex::decode(trimmed)
                .map_err(|_| CryptoError::InvalidKey("expected base64 or hex".to_string()))?,
        };

        if bytes.len() != KEY_LENGTH {
            return Err(CryptoError::InvalidKey(format!(
                "key must be {} bytes, got {}",
                KEY_LENGTH,
                bytes.len()
            )));
        }

        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&bytes);
        Ok(Self::new(key))
    }

    /// Generate a fresh random master key, base64 encoded.
    pub fn generate_key() -> String {
        use base64::{engine::general_purpose::STANDARD, Engine};
        STANDARD.encode(Aes256Gcm::generate_key(OsRng))
    }

    fn cipher_for(&self, provider: &str) -> Result<Aes256Gcm, CryptoError> {
        let hkdf = Hkdf::<Sha256>::new(Some(provider.as_bytes()), &self.master_key);
        let mut derived = [0u8; KEY_LENGTH];
        hkdf.expand(HKDF_INFO, &mut derived)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Aes256Gcm::new_from_slice(&derived).map_err(|e| CryptoError::InvalidKey(e.to_string()))
    }

    pub fn seal(&self, provider: &str, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let cipher = self.cipher_for(provider)?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, provider: &str, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(CryptoError::Decrypt("blob too short".to_string()));
        }
        let cipher = self.cipher_for(provider)?;
        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LENGTH);
        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| CryptoError::Decrypt("wrong key or tampered blob".to_string()))
    }

    pub fn seal_json<T: serde::Serialize>(&self, provider: &str, value: &T) -> Result<Vec<u8>, CryptoError> {
        let json = serde_json::to_vec(value)?;
        self.seal(provider, &json)
    }

    pub fn open_json<T: serde::de::DeserializeOwned>(
        &self,
        provider: &str,
        sealed: &[u8],
    ) -> Result<T, CryptoError> {
        let plaintext = self.open(provider, sealed)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

impl std::fmt::Debug for ConfigCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigCipher")
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}
