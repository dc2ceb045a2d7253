//! Authenticated payload encryption
//!
//! Every call draws a fresh 96-bit nonce. Keys are single-use per message, so
//! nonce reuse under one key cannot happen in practice.

use super::key_vault::MessageKey;
use super::{CryptoError, CryptoResult};
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::Zeroizing;

/// Nonce length for AES-GCM (12 bytes = 96 bits)
pub const IV_LEN: usize = 12;

/// Ciphertext (with tag) and the IV it was sealed under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_LEN],
}

impl SealedPayload {
    /// `(ciphertext, iv)` as stored in a message document
    pub fn to_base64(&self) -> (String, String) {
        (STANDARD.encode(&self.ciphertext), STANDARD.encode(self.iv))
    }

    /// Malformed input decodes to `DecryptionFailed` like any other bad payload
    pub fn from_base64(ciphertext: &str, iv: &str) -> CryptoResult<Self> {
        let ciphertext = STANDARD
            .decode(ciphertext)
            .map_err(|_| CryptoError::DecryptionFailed)?;
        let iv_bytes = STANDARD.decode(iv).map_err(|_| CryptoError::DecryptionFailed)?;
        let iv: [u8; IV_LEN] = iv_bytes
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::DecryptionFailed)?;
        Ok(SealedPayload { ciphertext, iv })
    }
}

/// AES-256-GCM codec
pub struct CipherCodec;

impl CipherCodec {
    pub fn encrypt(plaintext: &[u8], key: &MessageKey) -> CryptoResult<SealedPayload> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;

        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        Ok(SealedPayload { ciphertext, iv })
    }

    pub fn decrypt(sealed: &SealedPayload, key: &MessageKey) -> CryptoResult<Zeroizing<Vec<u8>>> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|_| CryptoError::DecryptionFailed)?;
        cipher
            .decrypt(Nonce::from_slice(&sealed.iv), sealed.ciphertext.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::DecryptionFailed)
    }
}
