//! Keystore module
//!
//! Device-local custody of message keys. Keys outlive the process only as
//! long as the backing storage does, and are destroyed on `remove`.

use super::key_vault::MessageKey;
use crate::core_store::model::MessageId;
use thiserror::Error;

pub mod file_keystore;
pub mod memory_keystore;

pub use file_keystore::FileKeyStore;
pub use memory_keystore::MemoryKeyStore;

/// Keystore errors
#[derive(Debug, Error)]
pub enum KeystoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupted key file: {0}")]
    Corrupted(String),

    #[error("Invalid key id: {0}")]
    InvalidId(String),

    #[error("Other error: {0}")]
    Other(String),
}

/// Device-local key custody
pub trait LocalKeyStore: Send + Sync {
    fn put(&self, id: &MessageId, key: &MessageKey) -> Result<(), KeystoreError>;

    fn get(&self, id: &MessageId) -> Result<Option<MessageKey>, KeystoreError>;

    /// Destroy a key. Returns whether one was present.
    fn remove(&self, id: &MessageId) -> Result<bool, KeystoreError>;

    /// Ids of all keys in custody
    fn ids(&self) -> Result<Vec<MessageId>, KeystoreError>;
}
