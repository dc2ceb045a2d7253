/*
    identity.rs - Identity and credential documents

    Identities live in the `identities` collection keyed by id; credentials
    live in `credentials` keyed by the lowercased handle. Credentials are only
    ever read by the access gate.
*/

use super::types::{IdentityId, Timestamp};
use crate::core_store::store::errors::ValidationError;
use serde::{Deserialize, Serialize};

/// Per-identity policy knobs exposed in settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityPolicy {
    /// Inactivity lock threshold
    pub session_timeout_minutes: u32,
    /// Burn timer applied to messages this identity sends
    pub message_expiration_seconds: u32,
}

/// A registered identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: IdentityId,
    /// Lowercased, unique handle
    pub handle: String,
    /// Handle as typed at registration
    pub display_name: String,
    pub public_identifier: String,
    pub policy: IdentityPolicy,
    /// Bound at first login, immutable afterwards
    #[serde(default)]
    pub device_fingerprint: Option<String>,
    pub created_at: Timestamp,
}

impl Identity {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.id.as_str().starts_with(IdentityId::PREFIX) {
            return Err(ValidationError::InvalidField {
                field: "id".to_string(),
                reason: "missing identity prefix".to_string(),
            });
        }
        if self.handle.is_empty() || self.handle != self.handle.to_lowercase() {
            return Err(ValidationError::InvalidField {
                field: "handle".to_string(),
                reason: "must be non-empty and lowercase".to_string(),
            });
        }
        if self.policy.session_timeout_minutes == 0 || self.policy.message_expiration_seconds == 0 {
            return Err(ValidationError::InvalidField {
                field: "policy".to_string(),
                reason: "timeouts must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Stored credential for a handle. All three hashes share `salt`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub identity_id: IdentityId,
    pub handle: String,
    /// base64 Argon2id output
    pub password_hash: String,
    pub real_pin_hash: String,
    pub decoy_pin_hash: String,
    /// base64, 16 bytes
    pub salt: String,
}

impl Credential {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let fields = [
            ("passwordHash", &self.password_hash),
            ("realPinHash", &self.real_pin_hash),
            ("decoyPinHash", &self.decoy_pin_hash),
            ("salt", &self.salt),
        ];
        for (field, value) in fields {
            if value.is_empty() {
                return Err(ValidationError::MissingField(field.to_string()));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("identity_id", &self.identity_id)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}
