/*
    Message lifecycle integration tests

    sent -> revealed -> destroyed between two connected devices:
    - one reveal, one winner, even under concurrency
    - the purge timer destroys ciphertext and escrowed key
    - overdue reveals are purged on the next unlock
    - the sender's key copy is dropped once the message burns
    - store outages leave messages untouched
*/

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use veilnode_core::core_crypto::{
    CipherCodec, LocalKeyStore, MemoryKeyStore, MessageKey, SealedPayload,
};
use veilnode_core::core_messaging::{Payload, RevealedContent, MEDIA_COVER};
use veilnode_core::core_store::model::{
    EphemeralMessage, EscrowRecord, MessageStatus, Timestamp, PURGED_CIPHERTEXT,
};
use veilnode_core::core_store::store::collections::{self, MESSAGES, MESSAGE_KEYS};
use veilnode_core::core_store::store::Document;
use veilnode_core::core_store::{MemoryStore, RemoteStore};
use veilnode_core::test_utils::{
    connect, secret, signed_in, signed_in_pair, TestClientBuilder, PASSPHRASE, REAL_PIN,
};
use veilnode_core::{OperatingMode, VeilError};

async fn stored(store: &MemoryStore, message: &EphemeralMessage) -> EphemeralMessage {
    collections::fetch(store, message.id.as_str())
        .await
        .unwrap()
        .expect("message document")
}

#[tokio::test(start_paused = true)]
async fn test_one_time_reveal_then_purge() {
    let store = MemoryStore::new();
    let (alice, _, bob, bob_id) = signed_in_pair(&store).await;
    connect(&alice, &bob, "bob").await;

    let sent = alice
        .send(&bob_id.id, Payload::text("meet at dawn"), Some("lunch?".into()))
        .await
        .unwrap();
    assert_eq!(sent.cover_text, "lunch?");
    assert_eq!(sent.status, MessageStatus::Sent);
    assert_eq!(sent.expiration_seconds, 15);

    let escrow: EscrowRecord = collections::fetch(&store, sent.id.as_str())
        .await
        .unwrap()
        .unwrap();
    let old_key = MessageKey::from_base64(&escrow.key).unwrap();

    let revealed = bob.reveal(&sent.id).await.unwrap();
    assert_eq!(revealed.content.as_text(), Some("meet at dawn"));
    assert_eq!(
        bob.revealed_content(&sent.id).await.unwrap().as_slice(),
        b"meet at dawn"
    );
    let after_reveal = stored(&store, &sent).await;
    assert_eq!(after_reveal.status, MessageStatus::Revealed);
    assert_eq!(after_reveal.purge_at, Some(revealed.purge_at));

    let err = bob.reveal(&sent.id).await.err().unwrap();
    assert!(matches!(err, VeilError::AlreadyRevealed));

    tokio::time::sleep(Duration::from_secs(16)).await;

    let destroyed = stored(&store, &sent).await;
    assert_eq!(destroyed.status, MessageStatus::Destroyed);
    assert_eq!(destroyed.ciphertext, PURGED_CIPHERTEXT);
    assert_eq!(store.count(MESSAGE_KEYS).await, 0);
    assert!(bob.revealed_content(&sent.id).await.is_none());

    let sealed = SealedPayload::from_base64(&destroyed.ciphertext, &destroyed.iv);
    assert!(sealed.and_then(|s| CipherCodec::decrypt(&s, &old_key)).is_err());

    let err = bob.reveal(&sent.id).await.err().unwrap();
    assert!(matches!(err, VeilError::AlreadyDestroyed));
}

#[tokio::test]
async fn test_concurrent_reveals_have_one_winner() {
    let store = MemoryStore::new();
    let (alice, _, bob, bob_id) = signed_in_pair(&store).await;
    connect(&alice, &bob, "bob").await;

    let sent = alice
        .send(&bob_id.id, Payload::text("once"), None)
        .await
        .unwrap();

    let (first, second) = tokio::join!(bob.reveal(&sent.id), bob.reveal(&sent.id));
    let winners = [first.is_ok(), second.is_ok()]
        .iter()
        .filter(|won| **won)
        .count();
    assert_eq!(winners, 1);

    let loser = first.err().or(second.err()).unwrap();
    assert!(matches!(loser, VeilError::AlreadyRevealed));
    assert_eq!(bob.lifecycle().scheduler().pending_count().await, 1);
}

#[tokio::test]
async fn test_sender_cannot_reveal() {
    let store = MemoryStore::new();
    let (alice, _, bob, bob_id) = signed_in_pair(&store).await;
    connect(&alice, &bob, "bob").await;

    let sent = alice
        .send(&bob_id.id, Payload::text("mine"), None)
        .await
        .unwrap();
    let err = alice.reveal(&sent.id).await.err().unwrap();
    assert!(matches!(err, VeilError::NotPermitted(_)));
    assert_eq!(stored(&store, &sent).await.status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_store_outage_leaves_message_unchanged() {
    let store = MemoryStore::new();
    let (alice, _, bob, bob_id) = signed_in_pair(&store).await;
    connect(&alice, &bob, "bob").await;

    let sent = alice
        .send(&bob_id.id, Payload::text("later"), None)
        .await
        .unwrap();

    store.set_available(false);
    let err = bob.reveal(&sent.id).await.err().unwrap();
    assert!(matches!(err, VeilError::StoreUnavailable(_)));
    assert!(err.is_retryable());
    store.set_available(true);

    assert_eq!(stored(&store, &sent).await.status, MessageStatus::Sent);
    let revealed = bob.reveal(&sent.id).await.unwrap();
    assert_eq!(revealed.content.as_text(), Some("later"));
}

#[tokio::test]
async fn test_overdue_reveal_purged_on_unlock() {
    let store = MemoryStore::new();
    let (alice, _, bob, bob_id) = signed_in_pair(&store).await;
    connect(&alice, &bob, "bob").await;

    let sent = alice
        .send(&bob_id.id, Payload::text("burn"), None)
        .await
        .unwrap();
    bob.reveal(&sent.id).await.unwrap();

    // Device dies before the timer fires
    bob.lifecycle().scheduler().cancel_all().await;
    let mut fields = Document::new();
    fields.insert("purgeAt".into(), json!(Timestamp::from_millis(1)));
    store.update(MESSAGES, sent.id.as_str(), fields).await.unwrap();

    bob.logout().await;
    bob.login("bob", &secret(PASSPHRASE)).await.unwrap();
    assert_eq!(
        bob.enter_pin(&secret(REAL_PIN)).await.unwrap(),
        OperatingMode::Normal
    );

    let destroyed = stored(&store, &sent).await;
    assert_eq!(destroyed.status, MessageStatus::Destroyed);
    assert_eq!(store.count(MESSAGE_KEYS).await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_sender_key_custody_released_after_burn() {
    let store = MemoryStore::new();
    let alice_keys = Arc::new(MemoryKeyStore::new());
    let alice = TestClientBuilder::new(&store)
        .with_key_store(alice_keys.clone())
        .build();
    signed_in(&alice, "alice").await;
    let bob = TestClientBuilder::new(&store).build();
    let bob_id = signed_in(&bob, "bob").await;
    connect(&alice, &bob, "bob").await;

    let sent = alice
        .send(&bob_id.id, Payload::text("gone soon"), None)
        .await
        .unwrap();
    assert!(alice_keys.get(&sent.id).unwrap().is_some());

    bob.reveal(&sent.id).await.unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(stored(&store, &sent).await.status, MessageStatus::Destroyed);
    assert!(alice_keys.get(&sent.id).unwrap().is_some());

    alice.logout().await;
    alice.login("alice", &secret(PASSPHRASE)).await.unwrap();
    assert_eq!(
        alice.enter_pin(&secret(REAL_PIN)).await.unwrap(),
        OperatingMode::Normal
    );
    assert!(alice_keys.get(&sent.id).unwrap().is_none());
}

#[tokio::test]
async fn test_conversation_is_ordered_and_shared() {
    let store = MemoryStore::new();
    let (alice, alice_id, bob, bob_id) = signed_in_pair(&store).await;
    connect(&alice, &bob, "bob").await;

    let first = alice.send(&bob_id.id, Payload::text("one"), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = bob.send(&alice_id.id, Payload::text("two"), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let third = alice.send(&bob_id.id, Payload::text("three"), None).await.unwrap();

    let from_alice: Vec<_> = alice
        .conversation(&bob_id.id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    let from_bob: Vec<_> = bob
        .conversation(&alice_id.id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(from_alice, vec![first.id, second.id, third.id]);
    assert_eq!(from_alice, from_bob);
}

#[tokio::test]
async fn test_media_message_round_trip() {
    let store = MemoryStore::new();
    let (alice, _, bob, bob_id) = signed_in_pair(&store).await;
    connect(&alice, &bob, "bob").await;

    let image = vec![0x89, b'P', b'N', b'G', 1, 2, 3];
    let sent = alice
        .send(&bob_id.id, Payload::media(image.clone(), "image/png"), None)
        .await
        .unwrap();
    assert_eq!(sent.cover_text, MEDIA_COVER);
    assert_eq!(sent.media_type.as_deref(), Some("image/png"));

    let revealed = bob.reveal(&sent.id).await.unwrap();
    match revealed.content {
        RevealedContent::Media { bytes, mime_type } => {
            assert_eq!(bytes.as_slice(), image.as_slice());
            assert_eq!(mime_type, "image/png");
        }
        RevealedContent::Text(_) => panic!("expected media"),
    }
}

#[tokio::test]
async fn test_lock_clears_revealed_content() {
    let store = MemoryStore::new();
    let (alice, _, bob, bob_id) = signed_in_pair(&store).await;
    connect(&alice, &bob, "bob").await;

    let sent = alice
        .send(&bob_id.id, Payload::text("secret"), None)
        .await
        .unwrap();
    bob.reveal(&sent.id).await.unwrap();
    assert_eq!(bob.session().revealed_count().await, 1);

    bob.logout().await;
    assert_eq!(bob.session().revealed_count().await, 0);
    assert!(bob.revealed_content(&sent.id).await.is_none());
}

#[tokio::test]
async fn test_decoy_send_stays_local() {
    let store = MemoryStore::new();
    let (alice, _, bob, bob_id) = signed_in_pair(&store).await;
    connect(&alice, &bob, "bob").await;

    alice.logout().await;
    alice.login("alice", &secret(PASSPHRASE)).await.unwrap();
    alice
        .enter_pin(&secret(veilnode_core::test_utils::DECOY_PIN))
        .await
        .unwrap();

    let sent = alice
        .send(&bob_id.id, Payload::text("hello support"), None)
        .await
        .unwrap();
    assert_eq!(store.count(MESSAGES).await, 0);
    assert!(collections::fetch::<EphemeralMessage>(&store, sent.id.as_str())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_conversation_feed_pushes_updates() {
    use veilnode_core::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};

    let store = MemoryStore::new();
    let (alice, alice_id, bob, bob_id) = signed_in_pair(&store).await;
    connect(&alice, &bob, "bob").await;

    let mut feed = bob.subscribe_conversation(&alice_id.id).await.unwrap();
    let initial = with_timeout(DEFAULT_TEST_TIMEOUT, feed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(initial.is_empty());

    let sent = alice
        .send(&bob_id.id, Payload::text("ping"), Some("weather ok?".into()))
        .await
        .unwrap();
    let update = with_timeout(DEFAULT_TEST_TIMEOUT, feed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(update.len(), 1);
    assert_eq!(update[0].id, sent.id);
    assert_eq!(update[0].cover_text, "weather ok?");
}
