/*
    contact.rs - Handshake documents

    Requests live in `requests` until the receiver responds. Accepted
    handshakes leave two mirrored records in `contacts`, keyed
    `<owner>:<counterpart>`.
*/

use super::types::{IdentityId, RequestId, Timestamp};
use crate::core_store::store::errors::ValidationError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContactStatus {
    Pending,
    Accepted,
    Ignored,
    Blocked,
}

impl ContactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContactStatus::Pending => "pending",
            ContactStatus::Accepted => "accepted",
            ContactStatus::Ignored => "ignored",
            ContactStatus::Blocked => "blocked",
        }
    }
}

/// Receiver's answer to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeDecision {
    Accept,
    Ignore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRequest {
    pub id: RequestId,
    pub sender_id: IdentityId,
    pub sender_handle: String,
    pub receiver_id: IdentityId,
    pub status: ContactStatus,
    pub created_at: Timestamp,
    /// Human-checkable `HS-XXXX` code both parties can compare
    pub handshake_fingerprint: String,
}

impl ContactRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_handshake_fingerprint(&self.handshake_fingerprint) {
            return Err(ValidationError::InvalidField {
                field: "handshakeFingerprint".to_string(),
                reason: "expected HS-XXXX".to_string(),
            });
        }
        if self.sender_id == self.receiver_id {
            return Err(ValidationError::InvalidField {
                field: "receiverId".to_string(),
                reason: "request addressed to its sender".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactRecord {
    pub owner_id: IdentityId,
    pub counterpart_id: IdentityId,
    pub status: ContactStatus,
    pub handshake_fingerprint: String,
    pub added_at: Timestamp,
}

impl ContactRecord {
    /// Document id inside the `contacts` collection
    pub fn key(owner: &IdentityId, counterpart: &IdentityId) -> String {
        format!("{}:{}", owner, counterpart)
    }

    pub fn document_id(&self) -> String {
        Self::key(&self.owner_id, &self.counterpart_id)
    }

    /// The record the counterpart holds for the same handshake
    pub fn mirror(&self) -> Self {
        ContactRecord {
            owner_id: self.counterpart_id.clone(),
            counterpart_id: self.owner_id.clone(),
            status: self.status,
            handshake_fingerprint: self.handshake_fingerprint.clone(),
            added_at: self.added_at,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if !is_handshake_fingerprint(&self.handshake_fingerprint) {
            return Err(ValidationError::InvalidField {
                field: "handshakeFingerprint".to_string(),
                reason: "expected HS-XXXX".to_string(),
            });
        }
        Ok(())
    }
}

/// `HS-` followed by four uppercase hex digits
pub fn is_handshake_fingerprint(value: &str) -> bool {
    match value.strip_prefix("HS-") {
        Some(code) => {
            code.len() == 4
                && code
                    .chars()
                    .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c))
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_format() {
        assert!(is_handshake_fingerprint("HS-0A9F"));
        assert!(!is_handshake_fingerprint("HS-0a9f"));
        assert!(!is_handshake_fingerprint("HS-0A9"));
        assert!(!is_handshake_fingerprint("XX-0A9F"));
    }

    #[test]
    fn test_mirror_swaps_parties_only() {
        let record = ContactRecord {
            owner_id: IdentityId::new("u_a"),
            counterpart_id: IdentityId::new("u_b"),
            status: ContactStatus::Accepted,
            handshake_fingerprint: "HS-1234".to_string(),
            added_at: Timestamp::from_millis(7),
        };
        let mirror = record.mirror();
        assert_eq!(mirror.owner_id, record.counterpart_id);
        assert_eq!(mirror.counterpart_id, record.owner_id);
        assert_eq!(mirror.handshake_fingerprint, record.handshake_fingerprint);
        assert_eq!(mirror.added_at, record.added_at);
        assert_eq!(mirror.mirror(), record);
        assert_eq!(record.document_id(), "u_a:u_b");
    }
}
