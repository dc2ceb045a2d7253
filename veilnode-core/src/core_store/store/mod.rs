/*
    Store subsystem - Remote document store boundary
*/

pub mod collections;
pub mod errors;
pub mod memory_store;
pub mod remote;

pub use errors::*;
pub use memory_store::MemoryStore;
pub use remote::{Batch, Document, Entry, Filter, Precondition, RemoteStore, Subscription, WriteOp};
