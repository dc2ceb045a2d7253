//! Per-device session state
//!
//! A [`SessionContext`] owns the operating mode, the authenticated identity,
//! the inactivity clock and every piece of decrypted content shown to the
//! user. Locking clears all of it before returning.

use super::integrity::{IntegrityAuditor, SecurityStatus};
use crate::config::SessionConfig;
use crate::core_crypto::KeyVault;
use crate::core_store::model::{Identity, MessageId};
use crate::errors::{VeilError, VeilResult};
use crate::metrics::{self, INTEGRITY_DOWNGRADES, SESSION_LOCKS};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperatingMode {
    Normal,
    DecoyOnly,
    #[default]
    Locked,
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperatingMode::Normal => "NORMAL",
            OperatingMode::DecoyOnly => "DECOY_ONLY",
            OperatingMode::Locked => "LOCKED",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockReason {
    Inactivity,
    FocusLost,
    Panic,
    Logout,
}

/// Session state for one device
pub struct SessionContext {
    mode: watch::Sender<OperatingMode>,
    identity: RwLock<Option<Identity>>,
    last_activity: Mutex<Instant>,
    status: RwLock<Option<SecurityStatus>>,
    revealed: Mutex<HashMap<MessageId, Zeroizing<Vec<u8>>>>,
    shielded: watch::Sender<bool>,
    vault: Arc<KeyVault>,
    lock_on_focus_loss: bool,
}

impl SessionContext {
    pub fn new(vault: Arc<KeyVault>, config: &SessionConfig) -> Self {
        let (mode, _) = watch::channel(OperatingMode::Locked);
        let (shielded, _) = watch::channel(false);
        Self {
            mode,
            identity: RwLock::new(None),
            last_activity: Mutex::new(Instant::now()),
            status: RwLock::new(None),
            revealed: Mutex::new(HashMap::new()),
            shielded,
            vault,
            lock_on_focus_loss: config.lock_on_focus_loss,
        }
    }

    pub fn mode(&self) -> OperatingMode {
        *self.mode.borrow()
    }

    /// Watch mode changes
    pub fn subscribe_mode(&self) -> watch::Receiver<OperatingMode> {
        self.mode.subscribe()
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.identity.read().await.clone()
    }

    /// Identity and mode of an unlocked session
    pub async fn require_unlocked(&self) -> VeilResult<(Identity, OperatingMode)> {
        let identity = self.identity.read().await.clone();
        match (identity, self.mode()) {
            (Some(identity), mode) if mode != OperatingMode::Locked => Ok((identity, mode)),
            _ => Err(VeilError::SessionLocked),
        }
    }

    /// Enter an authenticated mode
    pub async fn establish(&self, identity: Identity, mode: OperatingMode) {
        info!(identity = %identity.id, %mode, "session established");
        *self.identity.write().await = Some(identity);
        self.touch().await;
        self.mode.send_replace(mode);
    }

    /// Replace the cached identity after a policy change
    pub async fn refresh_identity(&self, identity: Identity) {
        let mut current = self.identity.write().await;
        if current.as_ref().map(|i| &i.id) == Some(&identity.id) {
            *current = Some(identity);
        }
    }

    /// Record user activity
    pub async fn touch(&self) {
        *self.last_activity.lock().await = Instant::now();
    }

    pub async fn idle_for(&self) -> Duration {
        self.last_activity.lock().await.elapsed()
    }

    /// Lock if the identity's inactivity threshold has passed
    pub async fn check_inactivity(&self) -> bool {
        if self.mode() == OperatingMode::Locked {
            return false;
        }
        let timeout = match self.identity.read().await.as_ref() {
            Some(identity) => {
                Duration::from_secs(u64::from(identity.policy.session_timeout_minutes) * 60)
            }
            None => return false,
        };
        if self.idle_for().await > timeout {
            self.lock(LockReason::Inactivity).await;
            return true;
        }
        false
    }

    /// Store an audit result and downgrade `NORMAL` if it failed.
    /// Returns whether a downgrade happened.
    pub async fn apply_audit(&self, status: SecurityStatus) -> bool {
        let failed = !status.integrity_ok;
        *self.status.write().await = Some(status);
        if !failed {
            return false;
        }

        let downgraded = self.mode.send_if_modified(|mode| {
            if *mode == OperatingMode::Normal {
                *mode = OperatingMode::DecoyOnly;
                true
            } else {
                false
            }
        });
        if downgraded {
            warn!("integrity failure, session forced to DECOY_ONLY");
            metrics::record_counter(INTEGRITY_DOWNGRADES, 1);
            self.clear_secrets().await;
        }
        downgraded
    }

    pub async fn security_status(&self) -> Option<SecurityStatus> {
        self.status.read().await.clone()
    }

    /// End the session and release every in-memory secret
    pub async fn lock(&self, reason: LockReason) {
        let was = self.mode.send_replace(OperatingMode::Locked);
        self.identity.write().await.take();
        self.clear_secrets().await;
        if was != OperatingMode::Locked {
            info!(?reason, "session locked");
            metrics::record_counter(SESSION_LOCKS, 1);
        }
    }

    /// Window lost focus or was hidden. Secrets are always released;
    /// the session itself locks only if configured to.
    pub async fn focus_lost(&self) {
        self.shielded.send_replace(true);
        if self.lock_on_focus_loss {
            self.lock(LockReason::FocusLost).await;
        } else {
            self.clear_secrets().await;
        }
    }

    pub fn focus_gained(&self) {
        self.shielded.send_replace(false);
    }

    pub fn is_shielded(&self) -> bool {
        *self.shielded.borrow()
    }

    /// Keep decrypted content for display
    pub async fn remember_revealed(&self, id: MessageId, content: Zeroizing<Vec<u8>>) {
        self.revealed.lock().await.insert(id, content);
    }

    pub async fn revealed_content(&self, id: &MessageId) -> Option<Zeroizing<Vec<u8>>> {
        self.revealed.lock().await.get(id).cloned()
    }

    pub async fn forget_revealed(&self, id: &MessageId) {
        self.revealed.lock().await.remove(id);
    }

    pub async fn revealed_count(&self) -> usize {
        self.revealed.lock().await.len()
    }

    async fn clear_secrets(&self) {
        // Zeroizing buffers wipe themselves on drop
        self.revealed.lock().await.clear();
        self.vault.release_memory();
    }
}

/// Background audit and inactivity tasks for a session
///
/// Both tasks stop once the session locks or the watchers are dropped.
pub struct SessionWatchers {
    audit: JoinHandle<()>,
    inactivity: JoinHandle<()>,
}

impl SessionWatchers {
    pub fn spawn(
        session: Arc<SessionContext>,
        auditor: Arc<IntegrityAuditor>,
        config: &SessionConfig,
    ) -> Self {
        let audit_every = config.audit_interval;
        let poll_every = config.inactivity_poll_interval;

        let audit_session = Arc::clone(&session);
        let audit = tokio::spawn(async move {
            let mut interval = tokio::time::interval(audit_every);
            loop {
                interval.tick().await;
                if audit_session.mode() == OperatingMode::Locked {
                    break;
                }
                let status = auditor.audit();
                audit_session.apply_audit(status).await;
            }
            debug!("audit watcher stopped");
        });

        let inactivity = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_every);
            loop {
                interval.tick().await;
                if session.mode() == OperatingMode::Locked {
                    break;
                }
                if session.check_inactivity().await {
                    debug!("inactivity watcher locked the session");
                    break;
                }
            }
        });

        Self { audit, inactivity }
    }

    /// Both background tasks have exited
    pub fn is_finished(&self) -> bool {
        self.audit.is_finished() && self.inactivity.is_finished()
    }
}

impl Drop for SessionWatchers {
    fn drop(&mut self) {
        self.audit.abort();
        self.inactivity.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_access::integrity::{DeviceFingerprint, EnvironmentSignals, StaticProbe};
    use crate::core_crypto::MemoryKeyStore;
    use crate::core_store::model::{IdentityId, IdentityPolicy, Timestamp};

    fn identity(timeout_minutes: u32) -> Identity {
        Identity {
            id: IdentityId::new("u_000000000001"),
            handle: "alice".to_string(),
            display_name: "alice".to_string(),
            public_identifier: "key_u_000000000001".to_string(),
            policy: IdentityPolicy {
                session_timeout_minutes: timeout_minutes,
                message_expiration_seconds: 15,
            },
            device_fingerprint: None,
            created_at: Timestamp::from_millis(0),
        }
    }

    fn session() -> (SessionContext, Arc<KeyVault>) {
        let vault = Arc::new(KeyVault::new(Arc::new(MemoryKeyStore::new())));
        (SessionContext::new(vault.clone(), &SessionConfig::default()), vault)
    }

    fn status(ok: bool) -> SecurityStatus {
        SecurityStatus {
            emulator_suspected: !ok,
            debugger_suspected: false,
            tampered: false,
            integrity_ok: ok,
            last_audit_time: Timestamp::from_millis(1),
            device_fingerprint: DeviceFingerprint::ephemeral(),
        }
    }

    #[tokio::test]
    async fn test_starts_locked() {
        let (session, _) = session();
        assert_eq!(session.mode(), OperatingMode::Locked);
        assert!(matches!(
            session.require_unlocked().await,
            Err(VeilError::SessionLocked)
        ));
    }

    #[tokio::test]
    async fn test_lock_clears_secrets() {
        let (session, vault) = session();
        session.establish(identity(5), OperatingMode::Normal).await;
        let id = MessageId::new("msg_1");
        vault.cache_local(&id, &vault.generate()).unwrap();
        session
            .remember_revealed(id.clone(), Zeroizing::new(b"plain".to_vec()))
            .await;

        session.lock(LockReason::Panic).await;
        assert_eq!(session.mode(), OperatingMode::Locked);
        assert!(session.identity().await.is_none());
        assert_eq!(session.revealed_count().await, 0);
        assert_eq!(vault.resident_keys(), 0);
    }

    #[tokio::test]
    async fn test_audit_downgrade_is_sticky() {
        let (session, _) = session();
        session.establish(identity(5), OperatingMode::Normal).await;

        assert!(!session.apply_audit(status(true)).await);
        assert_eq!(session.mode(), OperatingMode::Normal);

        assert!(session.apply_audit(status(false)).await);
        assert_eq!(session.mode(), OperatingMode::DecoyOnly);

        // a clean audit does not restore NORMAL
        assert!(!session.apply_audit(status(true)).await);
        assert_eq!(session.mode(), OperatingMode::DecoyOnly);
    }

    #[tokio::test]
    async fn test_failed_audit_leaves_locked_alone() {
        let (session, _) = session();
        assert!(!session.apply_audit(status(false)).await);
        assert_eq!(session.mode(), OperatingMode::Locked);
        assert!(!session.security_status().await.unwrap().integrity_ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_lock() {
        let (session, _) = session();
        session.establish(identity(1), OperatingMode::Normal).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(!session.check_inactivity().await);

        session.touch().await;
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!session.check_inactivity().await);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(session.check_inactivity().await);
        assert_eq!(session.mode(), OperatingMode::Locked);
    }

    #[tokio::test]
    async fn test_focus_loss_locks_and_shields() {
        let (session, _) = session();
        session.establish(identity(5), OperatingMode::DecoyOnly).await;
        session.focus_lost().await;
        assert!(session.is_shielded());
        assert_eq!(session.mode(), OperatingMode::Locked);
        session.focus_gained();
        assert!(!session.is_shielded());
    }

    #[tokio::test]
    async fn test_focus_loss_without_lock_releases_secrets() {
        let vault = Arc::new(KeyVault::new(Arc::new(MemoryKeyStore::new())));
        let config = SessionConfig {
            lock_on_focus_loss: false,
            ..SessionConfig::default()
        };
        let session = SessionContext::new(vault.clone(), &config);
        session.establish(identity(5), OperatingMode::Normal).await;
        let id = MessageId::new("msg_1");
        vault.cache_local(&id, &vault.generate()).unwrap();
        session
            .remember_revealed(id.clone(), Zeroizing::new(b"plain".to_vec()))
            .await;

        session.focus_lost().await;
        assert_eq!(session.mode(), OperatingMode::Normal);
        assert!(session.is_shielded());
        assert_eq!(session.revealed_count().await, 0);
        assert_eq!(vault.resident_keys(), 0);
        // device custody survives
        assert!(vault.fetch_local(&id).unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchers_stop_after_inactivity_lock() {
        let (session, _) = session();
        let session = Arc::new(session);
        let auditor = Arc::new(IntegrityAuditor::new(
            Arc::new(StaticProbe::clean()),
            Default::default(),
            DeviceFingerprint::ephemeral(),
        ));
        session.establish(identity(1), OperatingMode::Normal).await;
        let watchers = SessionWatchers::spawn(session.clone(), auditor, &SessionConfig::default());

        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(session.mode(), OperatingMode::Locked);
        assert!(watchers.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchers_downgrade_and_lock() {
        let (session, _) = session();
        let session = Arc::new(session);
        let probe = Arc::new(StaticProbe::clean());
        let auditor = Arc::new(IntegrityAuditor::new(
            probe.clone(),
            Default::default(),
            DeviceFingerprint::ephemeral(),
        ));
        session.establish(identity(1), OperatingMode::Normal).await;
        let _watchers = SessionWatchers::spawn(session.clone(), auditor, &SessionConfig::default());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(session.mode(), OperatingMode::Normal);

        probe.set(EnvironmentSignals {
            tampered: true,
            ..Default::default()
        });
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(session.mode(), OperatingMode::DecoyOnly);

        tokio::time::sleep(Duration::from_secs(70)).await;
        assert_eq!(session.mode(), OperatingMode::Locked);
    }
}
