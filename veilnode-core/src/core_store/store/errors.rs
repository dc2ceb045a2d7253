/*
    errors.rs - Error types for the store subsystem

    Defines all error types that can occur in:
    - Remote store access
    - Document decoding at the boundary
    - Validation
*/

use thiserror::Error;

/// Errors that can occur in the store subsystem
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Entity not found
    #[error("Not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// A stored document failed to decode or validate
    #[error("Invalid document {collection}/{id}: {reason}")]
    InvalidDocument {
        collection: String,
        id: String,
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StoreError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn invalid(collection: &str, id: &str, reason: impl ToString) -> Self {
        StoreError::InvalidDocument {
            collection: collection.to_string(),
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Validation-specific errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid field value
    #[error("Invalid field value: {field} - {reason}")]
    InvalidField { field: String, reason: String },
}
