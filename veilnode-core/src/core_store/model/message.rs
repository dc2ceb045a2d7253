/*
    message.rs - Ephemeral message and escrowed key documents

    A message document carries only ciphertext plus a non-secret cover
    string. Once destroyed, the payload fields hold the purge sentinels and
    nothing else.
*/

use super::types::{IdentityId, MessageId, Timestamp};
use crate::core_store::store::errors::ValidationError;
use serde::{Deserialize, Serialize};

/// Replaces the ciphertext of a destroyed message
pub const PURGED_CIPHERTEXT: &str = "[PURGED]";

/// Replaces the IV of a destroyed message
pub const PURGED_IV: &str = "";

/// Lifecycle status of an ephemeral message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    /// Reserved, never written by this crate
    Delivered,
    /// Reserved, never written by this crate
    Read,
    Revealed,
    Destroyed,
}

impl MessageStatus {
    /// Wire representation used for compare-and-swap
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
            MessageStatus::Revealed => "revealed",
            MessageStatus::Destroyed => "destroyed",
        }
    }
}

/// What the ciphertext decrypts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Text,
    Media,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EphemeralMessage {
    pub id: MessageId,
    pub sender_id: IdentityId,
    pub receiver_id: IdentityId,
    /// Shown while the message is sealed
    pub cover_text: String,
    /// base64 AES-GCM ciphertext, or the purge sentinel
    pub ciphertext: String,
    /// base64 96-bit IV, or the purge sentinel
    pub iv: String,
    pub payload_kind: PayloadKind,
    #[serde(default)]
    pub media_type: Option<String>,
    pub status: MessageStatus,
    pub created_at: Timestamp,
    pub is_one_time: bool,
    pub expiration_seconds: u32,
    #[serde(default)]
    pub revealed_at: Option<Timestamp>,
    /// Persisted purge deadline, set together with `Revealed`
    #[serde(default)]
    pub purge_at: Option<Timestamp>,
}

impl EphemeralMessage {
    /// True when `identity` is sender or receiver
    pub fn involves(&self, identity: &IdentityId) -> bool {
        &self.sender_id == identity || &self.receiver_id == identity
    }

    /// True when the message belongs to the conversation between `a` and `b`
    pub fn between(&self, a: &IdentityId, b: &IdentityId) -> bool {
        (&self.sender_id == a && &self.receiver_id == b)
            || (&self.sender_id == b && &self.receiver_id == a)
    }

    pub fn is_destroyed(&self) -> bool {
        self.status == MessageStatus::Destroyed
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.cover_text.is_empty() {
            return Err(ValidationError::MissingField("coverText".to_string()));
        }
        if self.expiration_seconds == 0 {
            return Err(ValidationError::InvalidField {
                field: "expirationSeconds".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        match self.status {
            MessageStatus::Destroyed => {
                if self.ciphertext != PURGED_CIPHERTEXT
                    || self.iv != PURGED_IV
                    || self.media_type.is_some()
                {
                    return Err(ValidationError::InvalidField {
                        field: "ciphertext".to_string(),
                        reason: "destroyed message still carries payload".to_string(),
                    });
                }
            }
            MessageStatus::Revealed => {
                if self.purge_at.is_none() {
                    return Err(ValidationError::MissingField("purgeAt".to_string()));
                }
            }
            _ => {
                if self.ciphertext.is_empty() || self.iv.is_empty() {
                    return Err(ValidationError::MissingField("ciphertext".to_string()));
                }
            }
        }
        if self.payload_kind == PayloadKind::Media
            && self.status != MessageStatus::Destroyed
            && self.media_type.is_none()
        {
            return Err(ValidationError::MissingField("mediaType".to_string()));
        }
        Ok(())
    }
}

/// Remote copy of a message key, readable only by the receiver
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowRecord {
    pub message_id: MessageId,
    /// base64 raw key bytes
    pub key: String,
    pub receiver_id: IdentityId,
}

impl EscrowRecord {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.key.is_empty() {
            return Err(ValidationError::MissingField("key".to_string()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for EscrowRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowRecord")
            .field("message_id", &self.message_id)
            .field("receiver_id", &self.receiver_id)
            .finish_non_exhaustive()
    }
}
