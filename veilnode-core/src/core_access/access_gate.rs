//! Two-phase authentication
//!
//! Phase one checks handle and passphrase and yields an [`Identity`]. Phase
//! two checks a 4-digit PIN: the real PIN opens `NORMAL`, the decoy PIN opens
//! `DECOY_ONLY`, anything else is a lockdown.

use super::integrity::{IntegrityAuditor, SecurityStatus};
use super::session::OperatingMode;
use crate::config::Config;
use crate::core_crypto::hashing::HASH_LEN;
use crate::core_crypto::{constant_time_eq, SecretHasher};
use crate::core_store::model::{Credential, Identity, IdentityId, IdentityPolicy, Timestamp};
use crate::core_store::store::collections::{self, CREDENTIALS, IDENTITIES};
use crate::core_store::store::{Batch, Document, RemoteStore};
use crate::errors::{VeilError, VeilResult};
use crate::metrics::{self, Timer, HASH_DURATION, LOGIN_FAILURES, PIN_LOCKDOWNS};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

const PIN_LEN: usize = 4;
const MAX_HANDLE_LEN: usize = 32;

/// Outcome of a successful PIN entry
#[derive(Debug, Clone)]
pub struct AccessGrant {
    pub mode: OperatingMode,
    pub status: SecurityStatus,
}

/// Verifies credentials and PINs
pub struct AccessGate {
    store: Arc<dyn RemoteStore>,
    hasher: SecretHasher,
    auditor: Arc<IntegrityAuditor>,
    default_policy: IdentityPolicy,
    max_expiration_seconds: u32,
}

impl AccessGate {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        auditor: Arc<IntegrityAuditor>,
        config: &Config,
    ) -> VeilResult<Self> {
        let hasher = SecretHasher::new(&config.crypto)?;
        Ok(Self {
            store,
            hasher,
            auditor,
            default_policy: IdentityPolicy {
                session_timeout_minutes: config.session.default_timeout_minutes,
                message_expiration_seconds: config.messages.default_expiration_seconds,
            },
            max_expiration_seconds: config.messages.max_expiration_seconds,
        })
    }

    /// Claim a handle and store its credential and identity
    pub async fn register(
        &self,
        handle: &str,
        passphrase: &SecretString,
        real_pin: &SecretString,
        decoy_pin: &SecretString,
    ) -> VeilResult<Identity> {
        let display_name = handle.trim().to_string();
        let handle = normalize_handle(handle)?;
        if passphrase.expose_secret().is_empty() {
            return Err(VeilError::InvalidInput("passphrase must not be empty".into()));
        }
        validate_pin(real_pin)?;
        validate_pin(decoy_pin)?;
        if real_pin.expose_secret() == decoy_pin.expose_secret() {
            return Err(VeilError::InvalidInput(
                "real and decoy PIN must differ".into(),
            ));
        }

        let salt = SecretHasher::generate_salt();
        let password_hash = self.hash(passphrase, &salt)?;
        let real_pin_hash = self.hash(real_pin, &salt)?;
        let decoy_pin_hash = self.hash(decoy_pin, &salt)?;

        let identity_id = IdentityId::generate();
        let identity = Identity {
            id: identity_id.clone(),
            handle: handle.clone(),
            display_name,
            public_identifier: format!("key_{}", identity_id),
            policy: self.default_policy,
            device_fingerprint: None,
            created_at: Timestamp::now(),
        };
        let credential = Credential {
            identity_id: identity_id.clone(),
            handle: handle.clone(),
            password_hash: STANDARD.encode(password_hash),
            real_pin_hash: STANDARD.encode(real_pin_hash),
            decoy_pin_hash: STANDARD.encode(decoy_pin_hash),
            salt: STANDARD.encode(salt),
        };

        let batch = Batch::new()
            .require_absent(CREDENTIALS, &handle)
            .set(CREDENTIALS, &handle, collections::encode(&credential)?)
            .set(IDENTITIES, identity_id.as_str(), collections::encode(&identity)?);
        if !self.store.commit(batch).await? {
            debug!(handle = %handle, "registration rejected, handle taken");
            return Err(VeilError::HandleClaimed);
        }

        info!(identity = %identity_id, "identity registered");
        Ok(identity)
    }

    /// Phase one. Unknown handles and wrong passphrases fail identically.
    pub async fn login(&self, handle: &str, passphrase: &SecretString) -> VeilResult<Identity> {
        let handle = match normalize_handle(handle) {
            Ok(handle) => handle,
            Err(_) => {
                self.burn_hash(passphrase);
                return Err(self.login_failed());
            }
        };

        let credential: Credential = match collections::fetch(self.store.as_ref(), &handle).await? {
            Some(credential) => credential,
            None => {
                self.burn_hash(passphrase);
                return Err(self.login_failed());
            }
        };

        let salt = decode_field(&credential.salt, &handle)?;
        let expected = decode_field(&credential.password_hash, &handle)?;
        let actual = self.hash(passphrase, &salt)?;
        if !constant_time_eq(&actual, &expected) {
            return Err(self.login_failed());
        }

        let mut identity: Identity =
            match collections::fetch(self.store.as_ref(), credential.identity_id.as_str()).await? {
                Some(identity) => identity,
                None => {
                    warn!(identity = %credential.identity_id, "credential without identity");
                    return Err(self.login_failed());
                }
            };

        self.bind_device(&mut identity).await?;
        info!(identity = %identity.id, "passphrase accepted");
        Ok(identity)
    }

    /// Phase two. Both comparisons always run before branching.
    pub async fn verify_pin(&self, identity: &Identity, pin: &SecretString) -> VeilResult<AccessGrant> {
        let credential =
            collections::fetch::<Credential>(self.store.as_ref(), &identity.handle)
                .await?
                .filter(|c| c.identity_id == identity.id)
                .ok_or(VeilError::IdentityMismatch)?;

        let salt = decode_field(&credential.salt, &identity.handle)?;
        let real = decode_field(&credential.real_pin_hash, &identity.handle)?;
        let decoy = decode_field(&credential.decoy_pin_hash, &identity.handle)?;
        let candidate = self.hash(pin, &salt)?;

        let is_real = constant_time_eq(&candidate, &real);
        let is_decoy = constant_time_eq(&candidate, &decoy);

        let mode = match (is_real, is_decoy) {
            (true, _) => OperatingMode::Normal,
            (false, true) => OperatingMode::DecoyOnly,
            (false, false) => {
                warn!(identity = %identity.id, "PIN rejected, lockdown engaged");
                metrics::record_counter(PIN_LOCKDOWNS, 1);
                return Err(VeilError::LockdownEngaged);
            }
        };

        let status = self.auditor.audit();
        let mode = if mode == OperatingMode::Normal && !status.integrity_ok {
            OperatingMode::DecoyOnly
        } else {
            mode
        };
        debug!(identity = %identity.id, %mode, "PIN accepted");
        Ok(AccessGrant { mode, status })
    }

    /// Change the identity's session timeout and/or burn timer
    pub async fn update_policy(
        &self,
        identity_id: &IdentityId,
        session_timeout_minutes: Option<u32>,
        message_expiration_seconds: Option<u32>,
    ) -> VeilResult<Identity> {
        let mut identity: Identity = collections::fetch(self.store.as_ref(), identity_id.as_str())
            .await?
            .ok_or_else(|| VeilError::InvalidInput(format!("unknown identity {}", identity_id)))?;

        if let Some(minutes) = session_timeout_minutes {
            if minutes == 0 {
                return Err(VeilError::InvalidInput("session timeout must be positive".into()));
            }
            identity.policy.session_timeout_minutes = minutes;
        }
        if let Some(seconds) = message_expiration_seconds {
            if seconds == 0 || seconds > self.max_expiration_seconds {
                return Err(VeilError::InvalidInput(format!(
                    "message expiration must be between 1 and {} seconds",
                    self.max_expiration_seconds
                )));
            }
            identity.policy.message_expiration_seconds = seconds;
        }

        let mut fields = Document::new();
        fields.insert(
            "policy".to_string(),
            Value::Object(collections::encode(&identity.policy)?),
        );
        self.store
            .update(IDENTITIES, identity_id.as_str(), fields)
            .await?;
        info!(identity = %identity_id, "policy updated");
        Ok(identity)
    }

    async fn bind_device(&self, identity: &mut Identity) -> VeilResult<()> {
        let current = self.auditor.fingerprint().as_str();
        match identity.device_fingerprint.as_deref() {
            None => {
                let mut fields = Document::new();
                fields.insert("deviceFingerprint".to_string(), json!(current));
                let bound = self
                    .store
                    .compare_and_update(
                        IDENTITIES,
                        identity.id.as_str(),
                        "deviceFingerprint",
                        &Value::Null,
                        fields,
                    )
                    .await?;
                if bound {
                    info!(identity = %identity.id, "device fingerprint bound");
                    identity.device_fingerprint = Some(current.to_string());
                }
            }
            Some(bound) if bound != current => {
                // Policy hook only
                warn!(identity = %identity.id, "login from unbound device");
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn hash(&self, secret: &SecretString, salt: &[u8]) -> VeilResult<[u8; HASH_LEN]> {
        let timer = Timer::new(HASH_DURATION);
        let hash = self.hasher.hash(secret.expose_secret().as_bytes(), salt)?;
        timer.stop();
        Ok(hash)
    }

    /// Equalize timing for logins that fail before the real hash
    fn burn_hash(&self, secret: &SecretString) {
        let salt = SecretHasher::generate_salt();
        let _ = self.hash(secret, &salt);
    }

    fn login_failed(&self) -> VeilError {
        metrics::record_counter(LOGIN_FAILURES, 1);
        VeilError::IdentityMismatch
    }
}

/// Trimmed, lowercased handle
pub fn normalize_handle(handle: &str) -> VeilResult<String> {
    let handle = handle.trim().to_lowercase();
    if handle.is_empty() {
        return Err(VeilError::InvalidInput("handle must not be empty".into()));
    }
    if handle.chars().count() > MAX_HANDLE_LEN {
        return Err(VeilError::InvalidInput(format!(
            "handle longer than {} characters",
            MAX_HANDLE_LEN
        )));
    }
    if handle.chars().any(|c| c.is_whitespace() || c == ':' || c == '/') {
        return Err(VeilError::InvalidInput("handle contains reserved characters".into()));
    }
    Ok(handle)
}

fn validate_pin(pin: &SecretString) -> VeilResult<()> {
    let pin = pin.expose_secret();
    if pin.len() != PIN_LEN || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VeilError::InvalidInput(format!(
            "PIN must be exactly {} digits",
            PIN_LEN
        )));
    }
    Ok(())
}

fn decode_field(encoded: &str, handle: &str) -> VeilResult<Vec<u8>> {
    STANDARD.decode(encoded).map_err(|_| {
        VeilError::InvalidDocument(format!("credential for {} is not valid base64", handle))
    })
}
