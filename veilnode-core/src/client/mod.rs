//! Client façade
//!
//! [`VeilClient`] wires the access, contact and messaging components around
//! one [`SessionContext`] and gates every operation on the operating mode.
//! In `DECOY_ONLY` the client serves the [`DecoyWorkspace`] and never touches
//! real contacts, requests or message content.

use crate::config::Config;
use crate::core_access::{
    AccessGate, DeviceFingerprint, EnvironmentProbe, HostProbe, IntegrityAuditor, LockReason,
    OperatingMode, SecurityStatus, SessionContext, SessionWatchers, TamperFlag,
};
use crate::core_contacts::{HandshakeCoordinator, HandshakeOutcome, RequestFeed};
use crate::core_crypto::{FileKeyStore, KeyVault, LocalKeyStore};
use crate::core_messaging::{
    ConversationFeed, DecoyTextProvider, DecoyWorkspace, FallbackDecoyProvider, MessageLifecycle,
    Payload, RevealedMessage, MEDIA_COVER,
};
use crate::core_store::model::{
    ContactRequest, EphemeralMessage, HandshakeDecision, Identity, IdentityId, MessageId,
    RequestId, Timestamp,
};
use crate::core_store::store::{MemoryStore, RemoteStore};
use crate::errors::{VeilError, VeilResult};
use secrecy::SecretString;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{info, warn};
use zeroize::Zeroizing;

/// Contact as listed to the user, real or decoy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactSummary {
    pub id: IdentityId,
    pub handle: String,
    pub display_name: String,
    pub handshake_fingerprint: Option<String>,
}

/// Builder for [`VeilClient`]
pub struct VeilClientBuilder {
    config: Config,
    store: Option<Arc<dyn RemoteStore>>,
    key_store: Option<Arc<dyn LocalKeyStore>>,
    probe: Option<Arc<dyn EnvironmentProbe>>,
    fingerprint: Option<DeviceFingerprint>,
    decoy_provider: Option<Arc<dyn DecoyTextProvider>>,
}

impl VeilClientBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            key_store: None,
            probe: None,
            fingerprint: None,
            decoy_provider: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn key_store(mut self, key_store: Arc<dyn LocalKeyStore>) -> Self {
        self.key_store = Some(key_store);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn EnvironmentProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn fingerprint(mut self, fingerprint: DeviceFingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn decoy_provider(mut self, provider: Arc<dyn DecoyTextProvider>) -> Self {
        self.decoy_provider = Some(provider);
        self
    }

    /// Anything not supplied defaults to the host: in-memory store, key files
    /// and fingerprint under `storage.data_dir`, [`HostProbe`].
    pub fn build(self) -> VeilResult<VeilClient> {
        self.config.validate()?;
        let data_dir = self.config.storage.data_dir.clone();

        let store: Arc<dyn RemoteStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let key_store: Arc<dyn LocalKeyStore> = match self.key_store {
            Some(key_store) => key_store,
            None => Arc::new(FileKeyStore::new(data_dir.join("keys"))?),
        };
        let fingerprint = match self.fingerprint {
            Some(fingerprint) => fingerprint,
            None => DeviceFingerprint::load_or_create(data_dir.join("device_id"))?,
        };
        let probe: Arc<dyn EnvironmentProbe> = match self.probe {
            Some(probe) => probe,
            None => Arc::new(HostProbe::new(TamperFlag::new())),
        };
        let covers = match self.decoy_provider {
            Some(provider) => FallbackDecoyProvider::new(provider),
            None => FallbackDecoyProvider::offline(),
        };

        let vault = Arc::new(KeyVault::new(key_store));
        let auditor = Arc::new(IntegrityAuditor::new(
            probe,
            self.config.integrity.clone(),
            fingerprint,
        ));
        let gate = AccessGate::new(Arc::clone(&store), Arc::clone(&auditor), &self.config)?;
        let session = Arc::new(SessionContext::new(Arc::clone(&vault), &self.config.session));

        Ok(VeilClient {
            handshakes: HandshakeCoordinator::new(Arc::clone(&store)),
            lifecycle: MessageLifecycle::new(store, vault, covers),
            gate,
            session,
            auditor,
            decoy: DecoyWorkspace::new(),
            pending: RwLock::new(None),
            watchers: Mutex::new(None),
            config: self.config,
        })
    }
}

/// One device's view of the system
pub struct VeilClient {
    config: Config,
    gate: AccessGate,
    handshakes: HandshakeCoordinator,
    lifecycle: MessageLifecycle,
    session: Arc<SessionContext>,
    auditor: Arc<IntegrityAuditor>,
    decoy: DecoyWorkspace,
    /// Passed phase one, awaiting PIN
    pending: RwLock<Option<Identity>>,
    watchers: Mutex<Option<SessionWatchers>>,
}

impl VeilClient {
    pub fn builder(config: Config) -> VeilClientBuilder {
        VeilClientBuilder::new(config)
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    pub fn lifecycle(&self) -> &MessageLifecycle {
        &self.lifecycle
    }

    pub fn mode(&self) -> OperatingMode {
        self.session.mode()
    }

    pub fn subscribe_mode(&self) -> watch::Receiver<OperatingMode> {
        self.session.subscribe_mode()
    }

    pub async fn register(
        &self,
        handle: &str,
        passphrase: &SecretString,
        real_pin: &SecretString,
        decoy_pin: &SecretString,
    ) -> VeilResult<Identity> {
        self.gate
            .register(handle, passphrase, real_pin, decoy_pin)
            .await
    }

    /// Phase one. Any open session is locked first.
    pub async fn login(&self, handle: &str, passphrase: &SecretString) -> VeilResult<Identity> {
        if self.mode() != OperatingMode::Locked {
            self.lock(LockReason::Logout).await;
        }
        let identity = self.gate.login(handle, passphrase).await?;
        *self.pending.write().await = Some(identity.clone());
        Ok(identity)
    }

    /// Phase two. Opens the session in the mode the PIN selects.
    pub async fn enter_pin(&self, pin: &SecretString) -> VeilResult<OperatingMode> {
        let identity = self
            .pending
            .read()
            .await
            .clone()
            .ok_or(VeilError::SessionLocked)?;

        let grant = match self.gate.verify_pin(&identity, pin).await {
            Ok(grant) => grant,
            Err(e) => {
                if matches!(e, VeilError::LockdownEngaged) {
                    self.pending.write().await.take();
                }
                return Err(e);
            }
        };
        self.pending.write().await.take();

        let identity_id = identity.id.clone();
        self.session.establish(identity, grant.mode).await;
        self.session.apply_audit(grant.status).await;
        *self.watchers.lock().await = Some(SessionWatchers::spawn(
            Arc::clone(&self.session),
            Arc::clone(&self.auditor),
            &self.config.session,
        ));

        let mode = self.mode();
        if mode == OperatingMode::Normal {
            if let Err(e) = self.lifecycle.reconcile_overdue(&identity_id).await {
                warn!(error = %e, "reconcile of revealed messages deferred");
            }
        }
        Ok(mode)
    }

    /// Lock and stop background watchers. Scheduled purges keep running.
    pub async fn lock(&self, reason: LockReason) {
        self.watchers.lock().await.take();
        self.pending.write().await.take();
        self.session.lock(reason).await;
        self.decoy.reset().await;
    }

    pub async fn logout(&self) {
        self.lock(LockReason::Logout).await;
    }

    /// Window hidden or blurred
    pub async fn focus_lost(&self) {
        self.session.focus_lost().await;
        if self.mode() == OperatingMode::Locked {
            self.lock(LockReason::FocusLost).await;
        }
    }

    pub async fn touch(&self) {
        self.session.touch().await;
    }

    /// Latest audit, or a fresh one if none ran yet
    pub async fn security_status(&self) -> SecurityStatus {
        match self.session.security_status().await {
            Some(status) => status,
            None => self.auditor.audit(),
        }
    }

    pub async fn contacts(&self) -> VeilResult<Vec<ContactSummary>> {
        let (identity, mode) = self.active().await?;
        if mode == OperatingMode::DecoyOnly {
            return Ok(self
                .decoy
                .contacts()
                .into_iter()
                .map(|c| ContactSummary {
                    id: c.id,
                    handle: c.handle,
                    display_name: c.display_name,
                    handshake_fingerprint: None,
                })
                .collect());
        }
        let views = self.handshakes.contacts(&identity.id).await?;
        Ok(views
            .into_iter()
            .map(|v| ContactSummary {
                id: v.identity.id,
                handle: v.identity.handle,
                display_name: v.identity.display_name,
                handshake_fingerprint: Some(v.record.handshake_fingerprint),
            })
            .collect())
    }

    pub async fn pending_requests(&self) -> VeilResult<Vec<ContactRequest>> {
        let (identity, mode) = self.active().await?;
        if mode == OperatingMode::DecoyOnly {
            return Ok(Vec::new());
        }
        self.handshakes.pending_requests(&identity.id).await
    }

    /// Live pending requests. `NORMAL` only.
    pub async fn subscribe_requests(&self) -> VeilResult<RequestFeed> {
        let identity = self.require_normal().await?;
        self.handshakes.subscribe_requests(&identity.id).await
    }

    pub async fn send_request(&self, target_handle: &str) -> VeilResult<ContactRequest> {
        let (identity, mode) = self.active().await?;
        if mode == OperatingMode::DecoyOnly {
            // Looks like an ordinary miss
            return Err(VeilError::TargetNotFound);
        }
        self.handshakes.send_request(&identity, target_handle).await
    }

    pub async fn respond(
        &self,
        request_id: &RequestId,
        decision: HandshakeDecision,
    ) -> VeilResult<HandshakeOutcome> {
        let (identity, mode) = self.active().await?;
        if mode == OperatingMode::DecoyOnly {
            return Ok(HandshakeOutcome::AlreadyResolved);
        }
        self.handshakes.respond(&identity.id, request_id, decision).await
    }

    pub async fn send(
        &self,
        receiver: &IdentityId,
        payload: Payload,
        cover: Option<String>,
    ) -> VeilResult<EphemeralMessage> {
        let (identity, mode) = self.active().await?;
        if mode == OperatingMode::DecoyOnly {
            let text = match &payload {
                Payload::Text(text) => cover.unwrap_or_else(|| text.as_str().to_string()),
                Payload::Media { .. } => cover.unwrap_or_else(|| MEDIA_COVER.to_string()),
            };
            return Ok(self.decoy.send(&identity.id, &text).await);
        }
        self.lifecycle
            .compose(&identity, receiver, payload, cover)
            .await
    }

    pub async fn conversation(&self, counterpart: &IdentityId) -> VeilResult<Vec<EphemeralMessage>> {
        let (identity, mode) = self.active().await?;
        if mode == OperatingMode::DecoyOnly {
            return Ok(self.decoy.conversation(&identity.id).await);
        }
        self.lifecycle.conversation(&identity.id, counterpart).await
    }

    pub async fn subscribe_conversation(
        &self,
        counterpart: &IdentityId,
    ) -> VeilResult<ConversationFeed> {
        let identity = self.require_normal().await?;
        self.lifecycle
            .subscribe_conversation(&identity.id, counterpart)
            .await
    }

    /// One-time reveal. In `DECOY_ONLY` every payload is unavailable.
    pub async fn reveal(&self, message_id: &MessageId) -> VeilResult<RevealedMessage> {
        let (identity, mode) = self.active().await?;
        if mode == OperatingMode::DecoyOnly {
            return Err(VeilError::KeyUnavailable);
        }
        let revealed = self.lifecycle.reveal(&identity.id, message_id).await?;
        self.session
            .remember_revealed(message_id.clone(), revealed.content.to_bytes())
            .await;

        // Drop the displayed copy when the message burns
        let session = Arc::clone(&self.session);
        let id = message_id.clone();
        let ttl = revealed.purge_at.remaining_from(Timestamp::now());
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            session.forget_revealed(&id).await;
        });

        Ok(revealed)
    }

    /// Plaintext still on screen for a revealed message
    pub async fn revealed_content(&self, message_id: &MessageId) -> Option<Zeroizing<Vec<u8>>> {
        self.session.revealed_content(message_id).await
    }

    pub async fn suggest_covers(&self) -> Vec<String> {
        self.lifecycle
            .suggest_covers(self.config.messages.cover_suggestions)
            .await
    }

    pub async fn update_policy(
        &self,
        session_timeout_minutes: Option<u32>,
        message_expiration_seconds: Option<u32>,
    ) -> VeilResult<Identity> {
        let identity = self.require_normal().await?;
        let updated = self
            .gate
            .update_policy(&identity.id, session_timeout_minutes, message_expiration_seconds)
            .await?;
        self.session.refresh_identity(updated.clone()).await;
        info!(identity = %updated.id, "session policy refreshed");
        Ok(updated)
    }

    async fn active(&self) -> VeilResult<(Identity, OperatingMode)> {
        let active = self.session.require_unlocked().await?;
        self.session.touch().await;
        Ok(active)
    }

    async fn require_normal(&self) -> VeilResult<Identity> {
        match self.active().await? {
            (identity, OperatingMode::Normal) => Ok(identity),
            _ => Err(VeilError::NotPermitted("unavailable in this workspace".into())),
        }
    }
}
