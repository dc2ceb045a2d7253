/*
    types.rs - Common types for core_store models

    Defines:
    - Timestamps
    - IDs for identities, messages and contact requests
*/

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix timestamp in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// Create a timestamp representing the current time
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Timestamp(millis)
    }

    /// Create a timestamp from milliseconds since epoch
    pub fn from_millis(millis: u64) -> Self {
        Timestamp(millis)
    }

    /// Get milliseconds since epoch
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// This timestamp shifted forward by `duration`
    pub fn plus(&self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration.as_millis() as u64))
    }

    /// Time remaining until this timestamp, zero if it already passed
    pub fn remaining_from(&self, now: Timestamp) -> Duration {
        Duration::from_millis(self.0.saturating_sub(now.0))
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::now()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(s.to_string())
            }
        }

        impl $name {
            /// Prefix carried by generated ids
            pub const PREFIX: &'static str = $prefix;
        }
    };
}

string_id!(
    /// Stable identifier of a registered identity
    IdentityId,
    "u_"
);

string_id!(
    /// Identifier of an ephemeral message (also keys its escrowed key)
    MessageId,
    "msg_"
);

string_id!(
    /// Identifier of a pending contact request
    RequestId,
    "req_"
);

impl IdentityId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 6];
        rand::RngCore::fill_bytes(&mut rand::rng(), &mut bytes);
        IdentityId(format!("{}{}", Self::PREFIX, hex::encode(bytes)))
    }
}

impl MessageId {
    pub fn generate() -> Self {
        MessageId(format!("{}{}", Self::PREFIX, uuid::Uuid::new_v4().simple()))
    }
}

impl RequestId {
    pub fn generate() -> Self {
        RequestId(format!("{}{}", Self::PREFIX, uuid::Uuid::new_v4().simple()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_carry_prefix() {
        assert!(IdentityId::generate().as_str().starts_with("u_"));
        assert!(MessageId::generate().as_str().starts_with("msg_"));
        assert!(RequestId::generate().as_str().starts_with("req_"));
        assert_ne!(MessageId::generate(), MessageId::generate());
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::from_millis(1_000);
        let later = t.plus(Duration::from_secs(15));
        assert_eq!(later.as_millis(), 16_000);
        assert_eq!(later.remaining_from(t), Duration::from_secs(15));
        assert_eq!(t.remaining_from(later), Duration::ZERO);
    }

    #[test]
    fn test_ids_serialize_as_plain_strings() {
        let id = MessageId::new("msg_abc");
        assert_eq!(serde_json::to_value(&id).unwrap(), serde_json::json!("msg_abc"));
    }
}
