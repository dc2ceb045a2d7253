//! One-time message lifecycle: `sent -> revealed -> destroyed`
//!
//! Every status change is a compare-and-update on the stored `status` field,
//! so concurrent reveals or purges of one message resolve to a single winner.

use super::decoy::{FallbackDecoyProvider, MEDIA_COVER};
use super::scheduler::PurgeScheduler;
use crate::core_crypto::{CipherCodec, KeyVault, MessageKey, SealedPayload};
use crate::core_store::model::{
    ContactRecord, ContactStatus, EphemeralMessage, EscrowRecord, Identity, IdentityId, MessageId,
    MessageStatus, PayloadKind, Timestamp, PURGED_CIPHERTEXT, PURGED_IV,
};
use crate::core_store::store::collections::{self, MESSAGES, MESSAGE_KEYS};
use crate::core_store::store::{Batch, Document, Filter, RemoteStore, StoreError, Subscription};
use crate::errors::{VeilError, VeilResult};
use crate::metrics::{self, MESSAGES_COMPOSED, MESSAGES_PURGED, MESSAGES_REVEALED, REVEAL_FAILURES};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// What the sender wants to deliver
pub enum Payload {
    Text(Zeroizing<String>),
    Media {
        bytes: Zeroizing<Vec<u8>>,
        mime_type: String,
    },
}

impl Payload {
    pub fn text(text: impl Into<String>) -> Self {
        Payload::Text(Zeroizing::new(text.into()))
    }

    pub fn media(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Payload::Media {
            bytes: Zeroizing::new(bytes),
            mime_type: mime_type.into(),
        }
    }
}

/// Decrypted content, wiped on drop
pub enum RevealedContent {
    Text(Zeroizing<String>),
    Media {
        bytes: Zeroizing<Vec<u8>>,
        mime_type: String,
    },
}

impl RevealedContent {
    /// Raw plaintext bytes
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        match self {
            RevealedContent::Text(text) => Zeroizing::new(text.as_bytes().to_vec()),
            RevealedContent::Media { bytes, .. } => bytes.clone(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RevealedContent::Text(text) => Some(text.as_str()),
            RevealedContent::Media { .. } => None,
        }
    }
}

/// A successful reveal
pub struct RevealedMessage {
    pub id: MessageId,
    pub content: RevealedContent,
    /// When the message will be destroyed
    pub purge_at: Timestamp,
}

/// Counts from a startup reconcile pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub purged: usize,
    pub rescheduled: usize,
    /// Destroyed messages whose keys were still held somewhere
    pub swept: usize,
}

/// Drives messages through their lifecycle
#[derive(Clone)]
pub struct MessageLifecycle {
    store: Arc<dyn RemoteStore>,
    vault: Arc<KeyVault>,
    scheduler: PurgeScheduler,
    covers: FallbackDecoyProvider,
}

impl MessageLifecycle {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        vault: Arc<KeyVault>,
        covers: FallbackDecoyProvider,
    ) -> Self {
        Self {
            store,
            vault,
            scheduler: PurgeScheduler::new(),
            covers,
        }
    }

    pub fn scheduler(&self) -> &PurgeScheduler {
        &self.scheduler
    }

    /// Seal and store a message for an accepted contact.
    /// `cover = None` means no decoy.
    pub async fn compose(
        &self,
        sender: &Identity,
        receiver_id: &IdentityId,
        payload: Payload,
        cover: Option<String>,
    ) -> VeilResult<EphemeralMessage> {
        if &sender.id == receiver_id {
            return Err(VeilError::InvalidInput("cannot message yourself".into()));
        }
        let contact: Option<ContactRecord> = collections::fetch(
            self.store.as_ref(),
            &ContactRecord::key(&sender.id, receiver_id),
        )
        .await?;
        if !matches!(contact, Some(ref c) if c.status == ContactStatus::Accepted) {
            return Err(VeilError::NotAContact);
        }

        let cover = cover
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());
        let (plaintext, payload_kind, media_type, cover_text) = match payload {
            Payload::Text(text) => {
                if text.trim().is_empty() {
                    return Err(VeilError::InvalidInput("message must not be empty".into()));
                }
                let cover_text = cover.unwrap_or_else(|| text.as_str().to_string());
                let bytes = Zeroizing::new(text.as_bytes().to_vec());
                (bytes, PayloadKind::Text, None, cover_text)
            }
            Payload::Media { bytes, mime_type } => {
                if bytes.is_empty() || mime_type.trim().is_empty() {
                    return Err(VeilError::InvalidInput("media needs bytes and a MIME type".into()));
                }
                let cover_text = cover.unwrap_or_else(|| MEDIA_COVER.to_string());
                (bytes, PayloadKind::Media, Some(mime_type), cover_text)
            }
        };

        let key = self.vault.generate();
        let sealed = CipherCodec::encrypt(&plaintext, &key)?;
        let (ciphertext, iv) = sealed.to_base64();

        let message = EphemeralMessage {
            id: MessageId::generate(),
            sender_id: sender.id.clone(),
            receiver_id: receiver_id.clone(),
            cover_text,
            ciphertext,
            iv,
            payload_kind,
            media_type,
            status: MessageStatus::Sent,
            created_at: Timestamp::now(),
            is_one_time: true,
            expiration_seconds: sender.policy.message_expiration_seconds,
            revealed_at: None,
            purge_at: None,
        };
        let escrow = EscrowRecord {
            message_id: message.id.clone(),
            key: key.to_base64().to_string(),
            receiver_id: receiver_id.clone(),
        };

        self.vault.cache_local(&message.id, &key)?;
        let batch = Batch::new()
            .require_absent(MESSAGES, message.id.as_str())
            .set(MESSAGES, message.id.as_str(), collections::encode(&message)?)
            .set(MESSAGE_KEYS, message.id.as_str(), collections::encode(&escrow)?);
        let committed = match self.store.commit(batch).await {
            Ok(committed) => committed,
            Err(e) => {
                self.vault.evict(&message.id)?;
                return Err(e.into());
            }
        };
        if !committed {
            self.vault.evict(&message.id)?;
            return Err(VeilError::Internal("message id collision".into()));
        }

        info!(message_id = %message.id, kind = ?message.payload_kind, "message composed");
        metrics::record_counter(MESSAGES_COMPOSED, 1);
        Ok(message)
    }

    /// Decrypt a sealed message once and schedule its destruction
    pub async fn reveal(
        &self,
        requester: &IdentityId,
        message_id: &MessageId,
    ) -> VeilResult<RevealedMessage> {
        let message: EphemeralMessage = collections::fetch(self.store.as_ref(), message_id.as_str())
            .await?
            .ok_or_else(|| VeilError::MessageNotFound(message_id.to_string()))?;

        if &message.sender_id == requester {
            return Err(VeilError::NotPermitted("sender cannot reveal own message".into()));
        }
        if &message.receiver_id != requester {
            return Err(VeilError::NotPermitted("not the receiver".into()));
        }
        match message.status {
            MessageStatus::Revealed => return Err(VeilError::AlreadyRevealed),
            MessageStatus::Destroyed => return Err(VeilError::AlreadyDestroyed),
            MessageStatus::Sent | MessageStatus::Delivered | MessageStatus::Read => {}
        }

        let key = match self.resolve_key(requester, message_id).await? {
            Some(key) => key,
            None => {
                warn!(message_id = %message_id, "no key for reveal");
                metrics::record_counter(REVEAL_FAILURES, 1);
                return Err(VeilError::KeyUnavailable);
            }
        };

        let plaintext = SealedPayload::from_base64(&message.ciphertext, &message.iv)
            .and_then(|sealed| CipherCodec::decrypt(&sealed, &key))
            .map_err(|_| {
                warn!(message_id = %message_id, "reveal failed to decrypt");
                metrics::record_counter(REVEAL_FAILURES, 1);
                VeilError::DecryptionFailed
            })?;
        let content = into_content(plaintext, &message)?;

        let now = Timestamp::now();
        let ttl = Duration::from_secs(u64::from(message.expiration_seconds));
        let purge_at = now.plus(ttl);
        let mut fields = Document::new();
        fields.insert("status".into(), json!(MessageStatus::Revealed.as_str()));
        fields.insert("revealedAt".into(), json!(now));
        fields.insert("purgeAt".into(), json!(purge_at));

        let won = self
            .store
            .compare_and_update(
                MESSAGES,
                message_id.as_str(),
                "status",
                &json!(message.status.as_str()),
                fields,
            )
            .await?;
        if !won {
            // content drops here and is wiped
            debug!(message_id = %message_id, "lost reveal race");
            return Err(VeilError::AlreadyRevealed);
        }

        if let Err(e) = self.vault.cache_local(message_id, &key) {
            warn!(message_id = %message_id, error = %e, "could not cache revealed key");
        }
        self.schedule_purge(message_id.clone(), ttl).await;

        info!(message_id = %message_id, "message revealed");
        metrics::record_counter(MESSAGES_REVEALED, 1);
        Ok(RevealedMessage {
            id: message_id.clone(),
            content,
            purge_at,
        })
    }

    /// Destroy a revealed message. Returns whether this call did it.
    pub async fn purge(&self, message_id: &MessageId) -> VeilResult<bool> {
        let mut fields = Document::new();
        fields.insert("status".into(), json!(MessageStatus::Destroyed.as_str()));
        fields.insert("ciphertext".into(), json!(PURGED_CIPHERTEXT));
        fields.insert("iv".into(), json!(PURGED_IV));
        fields.insert("mediaType".into(), Value::Null);

        let won = match self
            .store
            .compare_and_update(
                MESSAGES,
                message_id.as_str(),
                "status",
                &json!(MessageStatus::Revealed.as_str()),
                fields,
            )
            .await
        {
            Ok(won) => won,
            Err(StoreError::NotFound { .. }) => {
                debug!(message_id = %message_id, "purge of unknown message");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        if won {
            self.sweep_keys(message_id).await?;
            info!(message_id = %message_id, "message destroyed");
            metrics::record_counter(MESSAGES_PURGED, 1);
            return Ok(true);
        }

        // A crashed earlier purge may have left keys behind
        let current: Option<EphemeralMessage> =
            collections::fetch(self.store.as_ref(), message_id.as_str()).await?;
        if current.map(|m| m.is_destroyed()).unwrap_or(false) {
            self.sweep_keys(message_id).await?;
        }
        Ok(false)
    }

    /// Purge overdue reveals involving `participant`, reschedule the rest and
    /// drop any key material left behind by destroyed messages
    pub async fn reconcile_overdue(&self, participant: &IdentityId) -> VeilResult<ReconcileReport> {
        let candidates = self
            .involving(participant, MessageStatus::Revealed)
            .await?;

        let now = Timestamp::now();
        let mut report = ReconcileReport::default();
        for message in candidates {
            let deadline = message.purge_at.unwrap_or(now);
            if deadline <= now {
                if self.purge(&message.id).await? {
                    report.purged += 1;
                }
            } else if self
                .schedule_purge(message.id.clone(), deadline.remaining_from(now))
                .await
            {
                report.rescheduled += 1;
            }
        }

        for message in self
            .involving(participant, MessageStatus::Destroyed)
            .await?
        {
            if self.sweep_keys(&message.id).await? {
                report.swept += 1;
            }
        }

        if report != ReconcileReport::default() {
            info!(
                participant = %participant,
                purged = report.purged,
                rescheduled = report.rescheduled,
                swept = report.swept,
                "reconciled messages"
            );
        }
        Ok(report)
    }

    /// Both directions between `a` and `b`, oldest first
    pub async fn conversation(
        &self,
        a: &IdentityId,
        b: &IdentityId,
    ) -> VeilResult<Vec<EphemeralMessage>> {
        let entries = self.store.query(MESSAGES, &pair_filters(a, b)).await?;
        let messages = order_conversation(collections::decode_all(entries)?, a, b);
        for message in messages.iter().filter(|m| m.is_destroyed()) {
            if let Err(e) = self.vault.evict(&message.id) {
                warn!(message_id = %message.id, error = %e, "could not evict burned key");
            }
        }
        Ok(messages)
    }

    /// Push feed of [`Self::conversation`]
    pub async fn subscribe_conversation(
        &self,
        a: &IdentityId,
        b: &IdentityId,
    ) -> VeilResult<ConversationFeed> {
        let subscription = self.store.subscribe(MESSAGES, pair_filters(a, b)).await?;
        Ok(ConversationFeed {
            subscription,
            a: a.clone(),
            b: b.clone(),
        })
    }

    pub async fn suggest_covers(&self, count: usize) -> Vec<String> {
        self.covers.suggest(count).await
    }

    async fn resolve_key(
        &self,
        requester: &IdentityId,
        message_id: &MessageId,
    ) -> VeilResult<Option<MessageKey>> {
        if let Some(key) = self.vault.fetch_local(message_id)? {
            return Ok(Some(key));
        }
        let escrow: Option<EscrowRecord> =
            collections::fetch(self.store.as_ref(), message_id.as_str()).await?;
        match escrow {
            Some(record) if &record.receiver_id == requester => {
                Ok(MessageKey::from_base64(&record.key).ok())
            }
            Some(_) => {
                warn!(message_id = %message_id, "escrow requested by non-receiver");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn schedule_purge(&self, id: MessageId, delay: Duration) -> bool {
        let lifecycle = self.clone();
        let task_id = id.clone();
        self.scheduler
            .schedule(id, delay, async move {
                if let Err(e) = lifecycle.purge(&task_id).await {
                    warn!(message_id = %task_id, error = %e, "scheduled purge failed");
                }
            })
            .await
    }

    /// Delete the escrow record and local custody. Returns whether anything was left.
    async fn sweep_keys(&self, message_id: &MessageId) -> VeilResult<bool> {
        let escrowed = self.store.delete(MESSAGE_KEYS, message_id.as_str()).await?;
        let held = self.vault.evict(message_id)?;
        Ok(escrowed || held)
    }

    async fn involving(
        &self,
        participant: &IdentityId,
        status: MessageStatus,
    ) -> VeilResult<Vec<EphemeralMessage>> {
        let status = json!(status.as_str());
        let mut messages: Vec<EphemeralMessage> = Vec::new();
        for field in ["senderId", "receiverId"] {
            let found: Vec<EphemeralMessage> = collections::find(
                self.store.as_ref(),
                &[
                    Filter::eq("status", status.clone()),
                    Filter::eq(field, participant.as_str()),
                ],
            )
            .await?;
            messages.extend(found);
        }
        messages.sort_by(|a, b| a.id.cmp(&b.id));
        messages.dedup_by(|a, b| a.id == b.id);
        Ok(messages)
    }
}

/// Live view of a conversation
pub struct ConversationFeed {
    subscription: Subscription,
    a: IdentityId,
    b: IdentityId,
}

impl ConversationFeed {
    /// Next ordered snapshot, `None` once the feed ends
    pub async fn next(&mut self) -> Option<VeilResult<Vec<EphemeralMessage>>> {
        let entries = self.subscription.recv().await?;
        Some(
            collections::decode_all(entries)
                .map(|messages| order_conversation(messages, &self.a, &self.b))
                .map_err(VeilError::from),
        )
    }
}

fn pair_filters(a: &IdentityId, b: &IdentityId) -> Vec<Filter> {
    let pair = [a.as_str(), b.as_str()];
    vec![
        Filter::any_of("senderId", pair),
        Filter::any_of("receiverId", pair),
    ]
}

/// Store order is not trusted; sort by creation time, then id
fn order_conversation(
    mut messages: Vec<EphemeralMessage>,
    a: &IdentityId,
    b: &IdentityId,
) -> Vec<EphemeralMessage> {
    messages.retain(|m| m.between(a, b) && m.sender_id != m.receiver_id);
    messages.sort_by(|x, y| {
        x.created_at
            .cmp(&y.created_at)
            .then_with(|| x.id.cmp(&y.id))
    });
    messages
}

fn into_content(
    mut plaintext: Zeroizing<Vec<u8>>,
    message: &EphemeralMessage,
) -> VeilResult<RevealedContent> {
    match message.payload_kind {
        PayloadKind::Text => {
            let bytes = std::mem::take(&mut *plaintext);
            match String::from_utf8(bytes) {
                Ok(text) => Ok(RevealedContent::Text(Zeroizing::new(text))),
                Err(e) => {
                    // wipe the rejected buffer before bailing
                    drop(Zeroizing::new(e.into_bytes()));
                    Err(VeilError::DecryptionFailed)
                }
            }
        }
        PayloadKind::Media => Ok(RevealedContent::Media {
            bytes: plaintext,
            mime_type: message.media_type.clone().unwrap_or_default(),
        }),
    }
}
