//! Ephemeral messaging
//!
//! - [`MessageLifecycle`]: compose, one-time reveal, purge
//! - [`PurgeScheduler`]: cancellable deferred purges
//! - [`decoy`]: cover suggestions and the decoy-mode workspace

pub mod decoy;
pub mod lifecycle;
pub mod scheduler;

pub use decoy::{
    DecoyContact, DecoyError, DecoyTextProvider, DecoyWorkspace, FallbackDecoyProvider,
    StaticDecoyProvider, FALLBACK_COVERS, MEDIA_COVER,
};
pub use lifecycle::{
    ConversationFeed, MessageLifecycle, Payload, ReconcileReport, RevealedContent, RevealedMessage,
};
pub use scheduler::PurgeScheduler;
