//! Test fixtures for creating common test objects
//!
//! Clients share one [`MemoryStore`] the way real devices share the remote
//! store; each gets its own key cache, probe and fingerprint.

use crate::client::VeilClient;
use crate::config::Config;
use crate::core_access::{DeviceFingerprint, OperatingMode, StaticProbe};
use crate::core_crypto::MemoryKeyStore;
use crate::core_store::model::{HandshakeDecision, Identity};
use crate::core_store::store::MemoryStore;
use secrecy::SecretString;
use std::sync::Arc;

pub const PASSPHRASE: &str = "correct horse battery";
pub const REAL_PIN: &str = "1111";
pub const DECOY_PIN: &str = "2222";

pub fn secret(value: &str) -> SecretString {
    SecretString::new(value.to_string())
}

/// Default config with cheap Argon2 parameters
pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.crypto.argon2_memory_kib = 1024;
    config.crypto.argon2_iterations = 1;
    config.crypto.argon2_parallelism = 1;
    config
}

/// Builder for a client device in tests
pub struct TestClientBuilder {
    store: MemoryStore,
    config: Config,
    probe: Arc<StaticProbe>,
    key_store: Arc<MemoryKeyStore>,
}

impl TestClientBuilder {
    pub fn new(store: &MemoryStore) -> Self {
        Self {
            store: store.clone(),
            config: fast_config(),
            probe: Arc::new(StaticProbe::clean()),
            key_store: Arc::new(MemoryKeyStore::new()),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_probe(mut self, probe: Arc<StaticProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Keep a handle on the device's key custody
    pub fn with_key_store(mut self, key_store: Arc<MemoryKeyStore>) -> Self {
        self.key_store = key_store;
        self
    }

    pub fn build(self) -> VeilClient {
        VeilClient::builder(self.config)
            .store(Arc::new(self.store))
            .key_store(self.key_store)
            .probe(self.probe)
            .fingerprint(DeviceFingerprint::ephemeral())
            .build()
            .expect("test client")
    }
}

/// Register `handle` and unlock with the real PIN
pub async fn signed_in(client: &VeilClient, handle: &str) -> Identity {
    client
        .register(handle, &secret(PASSPHRASE), &secret(REAL_PIN), &secret(DECOY_PIN))
        .await
        .expect("register");
    let identity = client
        .login(handle, &secret(PASSPHRASE))
        .await
        .expect("login");
    let mode = client.enter_pin(&secret(REAL_PIN)).await.expect("pin");
    assert_eq!(mode, OperatingMode::Normal);
    identity
}

/// Two signed-in clients on a fresh store
pub async fn signed_in_pair(store: &MemoryStore) -> (VeilClient, Identity, VeilClient, Identity) {
    let alice = TestClientBuilder::new(store).build();
    let alice_id = signed_in(&alice, "alice").await;
    let bob = TestClientBuilder::new(store).build();
    let bob_id = signed_in(&bob, "bob").await;
    (alice, alice_id, bob, bob_id)
}

/// Complete a handshake from `from` to `to`
pub async fn connect(from: &VeilClient, to: &VeilClient, to_handle: &str) {
    let request = from.send_request(to_handle).await.expect("send request");
    to.respond(&request.id, HandshakeDecision::Accept)
        .await
        .expect("accept");
}
