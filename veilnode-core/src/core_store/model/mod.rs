/*
    model - Typed documents exchanged with the remote store
*/

pub mod contact;
pub mod identity;
pub mod message;
pub mod types;

pub use contact::{ContactRecord, ContactRequest, ContactStatus, HandshakeDecision};
pub use identity::{Credential, Identity, IdentityPolicy};
pub use message::{
    EphemeralMessage, EscrowRecord, MessageStatus, PayloadKind, PURGED_CIPHERTEXT, PURGED_IV,
};
pub use types::{IdentityId, MessageId, RequestId, Timestamp};
