//! Attachment encryption for medical records.
//!
//! Every attached file gets its own random key and nonce. Ciphertext goes to
//! the ledger; the key and nonce go to the key store under the record id.
//! XChaCha20-Poly1305 is authenticated, so opening with the wrong key fails
//! instead of producing garbage plaintext.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Key length in bytes
pub const KEY_LEN: usize = 32;
/// Nonce length in bytes (the "iv" of a key-store entry)
pub const IV_LEN: usize = 24;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Failed to generate random bytes: {0}")]
    Random(String),

    #[error("Invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Encryption failed")]
    Seal,

    #[error("Decryption failed: wrong key or corrupted ciphertext")]
    Open,
}

/// Per-attachment key material
#[derive(Clone, PartialEq, Eq)]
pub struct AttachmentKey {
    key: [u8; KEY_LEN],
    iv: [u8; IV_LEN],
}

impl AttachmentKey {
    /// Fresh key and nonce from the OS RNG
    pub fn generate() -> Result<Self, CryptoError> {
        let mut key = [0u8; KEY_LEN];
        let mut iv = [0u8; IV_LEN];
        getrandom::fill(&mut key).map_err(|e| CryptoError::Random(e.to_string()))?;
        getrandom::fill(&mut iv).map_err(|e| CryptoError::Random(e.to_string()))?;
        Ok(Self { key, iv })
    }

    pub fn from_parts(key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_LEN] = key.try_into().map_err(|_| CryptoError::InvalidLength {
            what: "key",
            expected: KEY_LEN,
            actual: key.len(),
        })?;
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| CryptoError::InvalidLength {
            what: "iv",
            expected: IV_LEN,
            actual: iv.len(),
        })?;
        Ok(Self { key, iv })
    }

    /// Key bytes (use carefully)
    pub fn key_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn iv_bytes(&self) -> &[u8; IV_LEN] {
        &self.iv
    }

    /// Short SHA-256 fingerprint, safe to log
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.key);
        hex::encode(&digest[..8])
    }
}

impl std::fmt::Debug for AttachmentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachmentKey")
            .field("fingerprint", &self.fingerprint())
            .finish_non_exhaustive()
    }
}

fn cipher(key: &AttachmentKey) -> XChaCha20Poly1305 {
    XChaCha20Poly1305::new(Key::from_slice(&key.key))
}

/// Encrypt `plaintext`; the output carries the authentication tag
pub fn seal(key: &AttachmentKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    cipher(key)
        .encrypt(XNonce::from_slice(&key.iv), plaintext)
        .map_err(|_| CryptoError::Seal)
}

/// Decrypt and authenticate `ciphertext`
pub fn open(key: &AttachmentKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    cipher(key)
        .decrypt(XNonce::from_slice(&key.iv), ciphertext)
        .map_err(|_| CryptoError::Open)
}
