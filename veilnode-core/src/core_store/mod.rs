/*
    core_store - Shared document state

    Typed models for everything the device exchanges with the remote store,
    the store interface itself and an in-memory implementation.
*/

pub mod model;
pub mod store;

// Re-export commonly used types
pub use model::{IdentityId, MessageId, RequestId, Timestamp};
pub use store::{MemoryStore, RemoteStore, StoreError, StoreResult};
