//! Argon2id secret hashing and constant-time comparison

use super::{CryptoError, CryptoResult};
use crate::config::CryptoConfig;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;
use argon2::{Algorithm, Argon2, Params, Version};
use subtle::ConstantTimeEq;

/// Salt length for Argon2 (16 bytes = 128 bits)
pub const SALT_LEN: usize = 16;

/// Argon2 output length
pub const HASH_LEN: usize = 32;

/// Hashes passphrases and PINs with a caller-supplied salt
#[derive(Clone)]
pub struct SecretHasher {
    params: Params,
}

impl SecretHasher {
    pub fn new(config: &CryptoConfig) -> CryptoResult<Self> {
        let params = Params::new(
            config.argon2_memory_kib,
            config.argon2_iterations,
            config.argon2_parallelism,
            Some(HASH_LEN),
        )
        .map_err(|e| CryptoError::Hashing(e.to_string()))?;
        Ok(Self { params })
    }

    pub fn generate_salt() -> [u8; SALT_LEN] {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        salt
    }

    pub fn hash(&self, secret: &[u8], salt: &[u8]) -> CryptoResult<[u8; HASH_LEN]> {
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone());
        let mut out = [0u8; HASH_LEN];
        argon2
            .hash_password_into(secret, salt, &mut out)
            .map_err(|e| CryptoError::Hashing(e.to_string()))?;
        Ok(out)
    }
}

/// Equality that does not short-circuit on the first differing byte
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}
