//! Top-level error type surfaced to callers of the core

use crate::config::ConfigError;
use crate::core_crypto::{CryptoError, KeystoreError};
use crate::core_store::store::StoreError;
use thiserror::Error;

/// Errors returned by the public operations of the core
#[derive(Debug, Error)]
pub enum VeilError {
    /// Unknown handle or wrong passphrase; the two are indistinguishable
    #[error("identity mismatch")]
    IdentityMismatch,

    /// PIN matched neither the real nor the decoy hash
    #[error("lockdown engaged")]
    LockdownEngaged,

    #[error("target not found")]
    TargetNotFound,

    #[error("handle already claimed")]
    HandleClaimed,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation not permitted: {0}")]
    NotPermitted(String),

    #[error("not a contact")]
    NotAContact,

    #[error("message not found: {0}")]
    MessageNotFound(String),

    #[error("message already revealed")]
    AlreadyRevealed,

    #[error("message already destroyed")]
    AlreadyDestroyed,

    #[error("session locked")]
    SessionLocked,

    // Key loss and tampering render identically
    #[error("payload unavailable")]
    KeyUnavailable,

    #[error("payload unavailable")]
    DecryptionFailed,

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invalid document: {0}")]
    InvalidDocument(String),

    #[error("local key custody failed: {0}")]
    LocalCustody(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl VeilError {
    /// Transient failure worth retrying without new input
    pub fn is_retryable(&self) -> bool {
        matches!(self, VeilError::StoreUnavailable(_))
    }

    /// Authentication and handshake outcomes the user is expected to act on
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            VeilError::IdentityMismatch
                | VeilError::LockdownEngaged
                | VeilError::TargetNotFound
                | VeilError::HandleClaimed
                | VeilError::InvalidInput(_)
                | VeilError::NotAContact
        )
    }
}

impl From<StoreError> for VeilError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => VeilError::StoreUnavailable(reason),
            StoreError::NotFound { collection, id } => {
                VeilError::Internal(format!("missing {}/{}", collection, id))
            }
            e @ StoreError::InvalidDocument { .. } => VeilError::InvalidDocument(e.to_string()),
            StoreError::Serialization(reason) | StoreError::Internal(reason) => {
                VeilError::Internal(reason)
            }
        }
    }
}

impl From<CryptoError> for VeilError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed => VeilError::DecryptionFailed,
            other => VeilError::Crypto(other.to_string()),
        }
    }
}

impl From<KeystoreError> for VeilError {
    fn from(err: KeystoreError) -> Self {
        VeilError::LocalCustody(err.to_string())
    }
}

pub type VeilResult<T> = Result<T, VeilError>;
