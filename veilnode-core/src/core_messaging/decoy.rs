//! Cover text and decoy-mode content
//!
//! Cover suggestions come from an external [`DecoyTextProvider`]. The provider
//! never sees message plaintext, and its failures never reach the caller.

use crate::core_store::model::{
    EphemeralMessage, IdentityId, MessageId, MessageStatus, PayloadKind, Timestamp,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::warn;

/// Covers used when no provider answers
pub const FALLBACK_COVERS: [&str; 4] = [
    "Did you see the weather forecast for tomorrow?",
    "I'm thinking of ordering pizza tonight.",
    "Just finished that book we talked about.",
    "Are we still on for the meeting later?",
];

/// Cover applied to media sent without a chosen decoy
pub const MEDIA_COVER: &str = "Shared an image.";

#[derive(Debug, Error)]
pub enum DecoyError {
    #[error("Decoy provider unavailable: {0}")]
    Unavailable(String),

    #[error("Decoy provider refused the request")]
    Unauthorized,
}

/// Source of harmless cover strings
#[async_trait]
pub trait DecoyTextProvider: Send + Sync {
    async fn suggest_covers(&self, count: usize) -> Result<Vec<String>, DecoyError>;
}

/// Provider cycling through a fixed list
pub struct StaticDecoyProvider {
    covers: Vec<String>,
}

impl StaticDecoyProvider {
    pub fn new(covers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            covers: covers.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for StaticDecoyProvider {
    fn default() -> Self {
        Self::new(FALLBACK_COVERS)
    }
}

#[async_trait]
impl DecoyTextProvider for StaticDecoyProvider {
    async fn suggest_covers(&self, count: usize) -> Result<Vec<String>, DecoyError> {
        Ok(self.covers.iter().cycle().take(count).cloned().collect())
    }
}

/// Wraps a provider and degrades to [`FALLBACK_COVERS`]
#[derive(Clone)]
pub struct FallbackDecoyProvider {
    inner: Option<Arc<dyn DecoyTextProvider>>,
}

impl FallbackDecoyProvider {
    pub fn new(inner: Arc<dyn DecoyTextProvider>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Fallback covers only
    pub fn offline() -> Self {
        Self { inner: None }
    }

    pub async fn suggest(&self, count: usize) -> Vec<String> {
        if count == 0 {
            return Vec::new();
        }
        if let Some(inner) = &self.inner {
            match inner.suggest_covers(count).await {
                Ok(mut covers) => {
                    covers.retain(|c| !c.trim().is_empty());
                    if !covers.is_empty() {
                        covers.truncate(count);
                        return covers;
                    }
                    warn!("decoy provider returned nothing, using fallback covers");
                }
                Err(e) => warn!(error = %e, "decoy provider failed, using fallback covers"),
            }
        }
        FALLBACK_COVERS
            .iter()
            .cycle()
            .take(count)
            .map(|c| c.to_string())
            .collect()
    }
}

/// A canned contact shown in `DECOY_ONLY`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoyContact {
    pub id: IdentityId,
    pub handle: String,
    pub display_name: String,
}

/// Plausible, harmless workspace shown under duress
///
/// Nothing here touches the remote store; messages sent in decoy mode stay in
/// this process.
pub struct DecoyWorkspace {
    contact: DecoyContact,
    transcript: Mutex<Vec<EphemeralMessage>>,
}

impl DecoyWorkspace {
    pub fn new() -> Self {
        let contact = DecoyContact {
            id: IdentityId::new("d1"),
            handle: "support".to_string(),
            display_name: "Workplace Support".to_string(),
        };
        Self {
            contact,
            transcript: Mutex::new(Vec::new()),
        }
    }

    pub fn contacts(&self) -> Vec<DecoyContact> {
        vec![self.contact.clone()]
    }

    pub fn is_decoy_contact(&self, id: &IdentityId) -> bool {
        &self.contact.id == id
    }

    /// Canned conversation with `viewer`, followed by anything sent locally
    pub async fn conversation(&self, viewer: &IdentityId) -> Vec<EphemeralMessage> {
        let mut messages = vec![self.canned(
            MessageId::new("m1"),
            self.contact.id.clone(),
            viewer.clone(),
            "Welcome to the secure corporate workspace. Your node is active.",
            Timestamp::from_millis(0),
        )];
        messages.extend(self.transcript.lock().await.iter().cloned());
        messages
    }

    /// Record a message typed in decoy mode
    pub async fn send(&self, sender: &IdentityId, text: &str) -> EphemeralMessage {
        let message = self.canned(
            MessageId::generate(),
            sender.clone(),
            self.contact.id.clone(),
            text,
            Timestamp::now(),
        );
        self.transcript.lock().await.push(message.clone());
        message
    }

    /// Forget locally sent messages
    pub async fn reset(&self) {
        self.transcript.lock().await.clear();
    }

    fn canned(
        &self,
        id: MessageId,
        sender_id: IdentityId,
        receiver_id: IdentityId,
        text: &str,
        created_at: Timestamp,
    ) -> EphemeralMessage {
        EphemeralMessage {
            id,
            sender_id,
            receiver_id,
            cover_text: text.to_string(),
            ciphertext: String::new(),
            iv: String::new(),
            payload_kind: PayloadKind::Text,
            media_type: None,
            status: MessageStatus::Sent,
            created_at,
            is_one_time: false,
            expiration_seconds: 1,
            revealed_at: None,
            purge_at: None,
        }
    }
}

impl Default for DecoyWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenProvider;

    #[async_trait]
    impl DecoyTextProvider for BrokenProvider {
        async fn suggest_covers(&self, _count: usize) -> Result<Vec<String>, DecoyError> {
            Err(DecoyError::Unauthorized)
        }
    }

    struct EmptyProvider;

    #[async_trait]
    impl DecoyTextProvider for EmptyProvider {
        async fn suggest_covers(&self, _count: usize) -> Result<Vec<String>, DecoyError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_fallback_on_error_and_empty() {
        for provider in [
            FallbackDecoyProvider::new(Arc::new(BrokenProvider)),
            FallbackDecoyProvider::new(Arc::new(EmptyProvider)),
            FallbackDecoyProvider::offline(),
        ] {
            let covers = provider.suggest(4).await;
            assert_eq!(covers, FALLBACK_COVERS.map(String::from).to_vec());
        }
    }

    #[tokio::test]
    async fn test_provider_answer_is_truncated() {
        let provider = FallbackDecoyProvider::new(Arc::new(StaticDecoyProvider::new([
            "a", "b", "c",
        ])));
        assert_eq!(provider.suggest(2).await, vec!["a", "b"]);
        assert_eq!(provider.suggest(5).await.len(), 5);
        assert!(provider.suggest(0).await.is_empty());
    }

    #[tokio::test]
    async fn test_decoy_workspace() {
        let workspace = DecoyWorkspace::new();
        let viewer = IdentityId::new("u_1");
        let contacts = workspace.contacts();
        assert_eq!(contacts[0].display_name, "Workplace Support");

        let convo = workspace.conversation(&viewer).await;
        assert_eq!(convo.len(), 1);
        assert_eq!(convo[0].receiver_id, viewer);

        workspace.send(&viewer, "on my way").await;
        let convo = workspace.conversation(&viewer).await;
        assert_eq!(convo.len(), 2);
        assert_eq!(convo[1].cover_text, "on my way");

        workspace.reset().await;
        assert_eq!(workspace.conversation(&viewer).await.len(), 1);
    }
}
