//! Cryptographic primitives
//!
//! - [`CipherCodec`]: AES-256-GCM sealing of message payloads
//! - [`KeyVault`]: per-message keys and their device-local custody
//! - [`SecretHasher`]: Argon2id hashing of passphrases and PINs

pub mod cipher;
pub mod hashing;
pub mod key_vault;
pub mod keystore;

pub use cipher::{CipherCodec, SealedPayload};
pub use hashing::{constant_time_eq, SecretHasher, SALT_LEN};
pub use key_vault::{KeyVault, MessageKey, KEY_LEN};
pub use keystore::{FileKeyStore, KeystoreError, LocalKeyStore, MemoryKeyStore};

use thiserror::Error;

/// Crypto errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Tag mismatch, wrong key or malformed input. Carries no detail.
    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Hashing failed: {0}")]
    Hashing(String),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
