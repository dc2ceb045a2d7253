/*
    Access flow integration tests

    Two-phase unlock against a shared in-memory store:
    - real PIN opens NORMAL, decoy PIN opens the decoy workspace
    - a wrong PIN engages lockdown and forgets the pending login
    - integrity failures downgrade NORMAL and never upgrade back
    - inactivity and focus loss lock the session
*/

use std::sync::Arc;
use std::time::Duration;
use veilnode_core::core_access::{EnvironmentSignals, StaticProbe};
use veilnode_core::core_store::model::MessageId;
use veilnode_core::core_store::MemoryStore;
use veilnode_core::test_utils::{
    secret, signed_in, wait_for_mode, TestClientBuilder, DECOY_PIN, DEFAULT_TEST_TIMEOUT,
    PASSPHRASE, REAL_PIN,
};
use veilnode_core::{LockReason, OperatingMode, VeilError};
use zeroize::Zeroizing;

#[tokio::test]
async fn test_decoy_pin_opens_decoy_workspace() {
    let store = MemoryStore::new();
    let client = TestClientBuilder::new(&store).build();
    let identity = signed_in(&client, "alice").await;
    client.logout().await;

    client.login("alice", &secret(PASSPHRASE)).await.unwrap();
    let mode = client.enter_pin(&secret(DECOY_PIN)).await.unwrap();
    assert_eq!(mode, OperatingMode::DecoyOnly);

    let contacts = client.contacts().await.unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].handle, "support");
    assert_eq!(contacts[0].display_name, "Workplace Support");

    let conversation = client.conversation(&contacts[0].id).await.unwrap();
    assert_eq!(conversation.len(), 1);
    assert_eq!(conversation[0].receiver_id, identity.id);
    assert!(conversation[0].cover_text.contains("corporate workspace"));

    let err = client.reveal(&conversation[0].id).await.err().unwrap();
    assert!(matches!(err, VeilError::KeyUnavailable));

    let err = client.send_request("bob").await.unwrap_err();
    assert!(matches!(err, VeilError::TargetNotFound));
    assert!(client.pending_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_wrong_pin_engages_lockdown() {
    let store = MemoryStore::new();
    let client = TestClientBuilder::new(&store).build();
    signed_in(&client, "alice").await;
    client.logout().await;

    client.login("alice", &secret(PASSPHRASE)).await.unwrap();
    let err = client.enter_pin(&secret("9999")).await.unwrap_err();
    assert!(matches!(err, VeilError::LockdownEngaged));
    assert_eq!(client.mode(), OperatingMode::Locked);

    // The login must be repeated
    let err = client.enter_pin(&secret(REAL_PIN)).await.unwrap_err();
    assert!(matches!(err, VeilError::SessionLocked));

    client.login("alice", &secret(PASSPHRASE)).await.unwrap();
    assert_eq!(
        client.enter_pin(&secret(REAL_PIN)).await.unwrap(),
        OperatingMode::Normal
    );
}

#[tokio::test]
async fn test_locked_session_rejects_operations() {
    let store = MemoryStore::new();
    let client = TestClientBuilder::new(&store).build();

    assert!(matches!(
        client.contacts().await.unwrap_err(),
        VeilError::SessionLocked
    ));
    assert!(matches!(
        client.enter_pin(&secret(REAL_PIN)).await.unwrap_err(),
        VeilError::SessionLocked
    ));
}

#[tokio::test]
async fn test_failed_audit_at_unlock_forces_decoy() {
    let store = MemoryStore::new();
    let probe = Arc::new(StaticProbe::new(EnvironmentSignals {
        emulator_suspected: true,
        ..Default::default()
    }));
    let client = TestClientBuilder::new(&store).with_probe(probe).build();

    client
        .register("alice", &secret(PASSPHRASE), &secret(REAL_PIN), &secret(DECOY_PIN))
        .await
        .unwrap();
    client.login("alice", &secret(PASSPHRASE)).await.unwrap();
    let mode = client.enter_pin(&secret(REAL_PIN)).await.unwrap();
    assert_eq!(mode, OperatingMode::DecoyOnly);

    let status = client.security_status().await;
    assert!(!status.integrity_ok);
    assert!(status.emulator_suspected);
}

#[tokio::test(start_paused = true)]
async fn test_integrity_downgrade_is_sticky() {
    let store = MemoryStore::new();
    let probe = Arc::new(StaticProbe::clean());
    let client = TestClientBuilder::new(&store)
        .with_probe(Arc::clone(&probe))
        .build();
    signed_in(&client, "alice").await;
    let mut modes = client.subscribe_mode();

    probe.set(EnvironmentSignals {
        tampered: true,
        ..Default::default()
    });
    wait_for_mode(&mut modes, OperatingMode::DecoyOnly, DEFAULT_TEST_TIMEOUT * 6)
        .await
        .unwrap();

    // A clean environment does not restore NORMAL
    probe.set(EnvironmentSignals::default());
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(client.mode(), OperatingMode::DecoyOnly);
    assert!(client.security_status().await.integrity_ok);
}

#[tokio::test(start_paused = true)]
async fn test_inactivity_locks_session() {
    let store = MemoryStore::new();
    let client = TestClientBuilder::new(&store).build();
    signed_in(&client, "alice").await;
    client.update_policy(Some(1), None).await.unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;
    client.touch().await;
    tokio::time::sleep(Duration::from_secs(45)).await;
    assert_eq!(client.mode(), OperatingMode::Normal);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(client.mode(), OperatingMode::Locked);
    assert!(matches!(
        client.contacts().await.unwrap_err(),
        VeilError::SessionLocked
    ));
}

#[tokio::test]
async fn test_focus_loss_locks_and_shields() {
    let store = MemoryStore::new();
    let client = TestClientBuilder::new(&store).build();
    signed_in(&client, "alice").await;

    client.focus_lost().await;
    assert_eq!(client.mode(), OperatingMode::Locked);
    assert!(client.session().is_shielded());

    client.session().focus_gained();
    assert!(!client.session().is_shielded());
}

#[tokio::test]
async fn test_focus_loss_without_lock_releases_secrets() {
    let store = MemoryStore::new();
    let mut config = veilnode_core::test_utils::fast_config();
    config.session.lock_on_focus_loss = false;
    let client = TestClientBuilder::new(&store).with_config(config).build();
    signed_in(&client, "alice").await;
    client
        .session()
        .remember_revealed(MessageId::new("msg_1"), Zeroizing::new(b"on screen".to_vec()))
        .await;

    client.focus_lost().await;
    assert_eq!(client.mode(), OperatingMode::Normal);
    assert!(client.session().is_shielded());
    assert_eq!(client.session().revealed_count().await, 0);

    client.lock(LockReason::Panic).await;
    assert_eq!(client.mode(), OperatingMode::Locked);
}

#[tokio::test]
async fn test_policy_bounds() {
    let store = MemoryStore::new();
    let client = TestClientBuilder::new(&store).build();
    signed_in(&client, "alice").await;

    let updated = client.update_policy(None, Some(60)).await.unwrap();
    assert_eq!(updated.policy.message_expiration_seconds, 60);

    let err = client.update_policy(Some(0), None).await.unwrap_err();
    assert!(matches!(err, VeilError::InvalidInput(_)));
}
