//! In-memory keystore for tests and ephemeral devices

use super::{KeystoreError, LocalKeyStore};
use crate::core_crypto::key_vault::MessageKey;
use crate::core_store::model::MessageId;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Helper to convert poison errors into KeystoreError
fn handle_poison<T>(_err: PoisonError<T>) -> KeystoreError {
    KeystoreError::Other("Lock poisoned: a thread panicked while holding the lock".to_string())
}

/// In-memory keystore (non-persistent)
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    keys: Arc<RwLock<HashMap<MessageId, MessageKey>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalKeyStore for MemoryKeyStore {
    fn put(&self, id: &MessageId, key: &MessageKey) -> Result<(), KeystoreError> {
        self.keys
            .write()
            .map_err(handle_poison)?
            .insert(id.clone(), key.clone());
        Ok(())
    }

    fn get(&self, id: &MessageId) -> Result<Option<MessageKey>, KeystoreError> {
        Ok(self.keys.read().map_err(handle_poison)?.get(id).cloned())
    }

    fn remove(&self, id: &MessageId) -> Result<bool, KeystoreError> {
        Ok(self.keys.write().map_err(handle_poison)?.remove(id).is_some())
    }

    fn ids(&self) -> Result<Vec<MessageId>, KeystoreError> {
        Ok(self.keys.read().map_err(handle_poison)?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_keystore_roundtrip() {
        let store = MemoryKeyStore::new();
        let id = MessageId::new("msg_a");
        let key = MessageKey::generate();

        store.put(&id, &key).unwrap();
        assert_eq!(store.get(&id).unwrap(), Some(key));
        assert_eq!(store.ids().unwrap(), vec![id.clone()]);

        assert!(store.remove(&id).unwrap());
        assert!(!store.remove(&id).unwrap());
        assert!(store.get(&id).unwrap().is_none());
    }
}
