//! Per-message key custody
//!
//! The vault keeps a hot set of keys in process memory in front of a
//! device-local [`LocalKeyStore`]. It never talks to the remote store;
//! escrow is the caller's job.

use super::keystore::{KeystoreError, LocalKeyStore};
use super::{CryptoError, CryptoResult};
use crate::core_store::model::MessageId;
use aes_gcm::aead::rand_core::RngCore;
use aes_gcm::aead::OsRng;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// AES-256 key length
pub const KEY_LEN: usize = 32;

/// Single-use symmetric key for one message
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct MessageKey([u8; KEY_LEN]);

impl MessageKey {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        MessageKey(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let arr: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CryptoError::InvalidKey(format!("expected {} bytes, got {}", KEY_LEN, bytes.len()))
        })?;
        Ok(MessageKey(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Escrow encoding
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.0))
    }

    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded)
                .map_err(|e| CryptoError::Encoding(e.to_string()))?,
        );
        Self::from_bytes(&bytes)
    }
}

impl fmt::Debug for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MessageKey(<redacted>)")
    }
}

/// Generates, caches and evicts message keys
pub struct KeyVault {
    hot: RwLock<HashMap<MessageId, MessageKey>>,
    local: Arc<dyn LocalKeyStore>,
}

impl KeyVault {
    pub fn new(local: Arc<dyn LocalKeyStore>) -> Self {
        Self {
            hot: RwLock::new(HashMap::new()),
            local,
        }
    }

    /// Fresh random key, not yet bound to a message
    pub fn generate(&self) -> MessageKey {
        MessageKey::generate()
    }

    /// Put a key in device custody until evicted
    pub fn cache_local(&self, id: &MessageId, key: &MessageKey) -> Result<(), KeystoreError> {
        self.local.put(id, key)?;
        self.hot
            .write()
            .map_err(handle_poison)?
            .insert(id.clone(), key.clone());
        debug!(message_id = %id, "key cached locally");
        Ok(())
    }

    pub fn fetch_local(&self, id: &MessageId) -> Result<Option<MessageKey>, KeystoreError> {
        if let Some(key) = self.hot.read().map_err(handle_poison)?.get(id) {
            return Ok(Some(key.clone()));
        }
        let key = self.local.get(id)?;
        if let Some(key) = &key {
            self.hot
                .write()
                .map_err(handle_poison)?
                .insert(id.clone(), key.clone());
        }
        Ok(key)
    }

    /// Drop a key from every local custody. Idempotent; returns whether a key was held.
    pub fn evict(&self, id: &MessageId) -> Result<bool, KeystoreError> {
        // Dropping the key zeroizes it
        let was_hot = self.hot.write().map_err(handle_poison)?.remove(id).is_some();
        let was_stored = self.local.remove(id)?;
        if was_stored {
            debug!(message_id = %id, "key evicted");
        }
        Ok(was_hot || was_stored)
    }

    /// Zeroize every key held in process memory. Device custody is untouched.
    pub fn release_memory(&self) {
        let mut hot = self.hot.write().unwrap_or_else(PoisonError::into_inner);
        let released = hot.len();
        hot.clear();
        if released > 0 {
            debug!(released, "released in-memory keys");
        }
    }

    /// Number of keys currently held in process memory
    pub fn resident_keys(&self) -> usize {
        self.hot.read().map(|hot| hot.len()).unwrap_or(0)
    }
}

fn handle_poison<T>(_err: PoisonError<T>) -> KeystoreError {
    KeystoreError::Other("Lock poisoned: a thread panicked while holding the lock".to_string())
}
