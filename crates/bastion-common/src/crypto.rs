//! Bastion Crypto - Secret Cipher
//!
//! Symmetric encryption for secret values kept in the key/value store.
//! Values are sealed with AES-256-GCM under a key derived from a passphrase
//! with SHA-256. The random 96-bit nonce is prepended to the ciphertext and
//! the whole envelope is base64 encoded so it fits a text column.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use crate::error::{BastionError, Result};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use data_encoding::BASE64;
use sha2::{Digest, Sha256};

/// AES-GCM nonce size in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

// =============================================================================
// Secret Cipher Trait
// =============================================================================

/// Encrypts and decrypts string secrets.
pub trait SecretCipher: Send + Sync {
    /// Seal a plaintext into a printable envelope.
    fn encrypt(&self, plaintext: &str) -> Result<String>;

    /// Open an envelope produced by [`SecretCipher::encrypt`].
    fn decrypt(&self, envelope: &str) -> Result<String>;
}

// =============================================================================
// AES-256-GCM Cipher
// =============================================================================

/// AES-256-GCM implementation of [`SecretCipher`].
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Derive the key from a passphrase.
    pub fn from_passphrase(passphrase: &str) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(BastionError::Configuration("no encryption key available".to_string()));
        }
        let key = Sha256::digest(passphrase.as_bytes());
        Self::from_key(&key)
    }

    /// Use a raw 32-byte key.
    pub fn from_key(key: &[u8]) -> Result<Self> {
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| BastionError::Configuration(format!("invalid encryption key: {}", e)))?;
        Ok(Self { cipher })
    }
}

impl SecretCipher for AesGcmCipher {
    fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| BastionError::Encryption(format!("encryption failed: {}", e)))?;

        let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        envelope.extend_from_slice(&nonce);
        envelope.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(&envelope))
    }

    fn decrypt(&self, envelope: &str) -> Result<String> {
        let bytes = BASE64
            .decode(envelope.as_bytes())
            .map_err(|e| BastionError::Encryption(format!("invalid envelope: {}", e)))?;

        if bytes.len() <= NONCE_SIZE {
            return Err(BastionError::Encryption("envelope too short".to_string()));
        }

        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| BastionError::Encryption(format!("decryption failed: {}", e)))?;

        String::from_utf8(plaintext)
            .map_err(|e| BastionError::Encryption(format!("secret is not UTF-8: {}", e)))
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesGcmCipher { .. }")
    }
}

// =============================================================================
// Tests
// =============================================================================
