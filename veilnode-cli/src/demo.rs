//! Two simulated devices on a local in-memory store

use anyhow::{anyhow, Result};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use veilnode_core::core_access::{DeviceFingerprint, StaticProbe};
use veilnode_core::core_crypto::MemoryKeyStore;
use veilnode_core::core_messaging::Payload;
use veilnode_core::core_store::model::{HandshakeDecision, MessageStatus};
use veilnode_core::core_store::MemoryStore;
use veilnode_core::{Config, OperatingMode, VeilClient};

const PASSPHRASE: &str = "demo passphrase";
const REAL_PIN: &str = "4821";
const DECOY_PIN: &str = "1379";

/// What the demo observed
#[derive(Debug)]
pub struct DemoReport {
    pub cover_text: String,
    pub revealed_text: String,
    pub final_status: MessageStatus,
    pub decoy_contacts: Vec<String>,
}

fn secret(value: &str) -> SecretString {
    SecretString::new(value.to_string())
}

fn device(config: &Config, store: &MemoryStore) -> Result<VeilClient> {
    Ok(VeilClient::builder(config.clone())
        .store(Arc::new(store.clone()))
        .key_store(Arc::new(MemoryKeyStore::new()))
        .probe(Arc::new(StaticProbe::clean()))
        .fingerprint(DeviceFingerprint::ephemeral())
        .build()?)
}

async fn unlock(client: &VeilClient, handle: &str, pin: &str) -> Result<OperatingMode> {
    client.login(handle, &secret(PASSPHRASE)).await?;
    Ok(client.enter_pin(&secret(pin)).await?)
}

pub async fn run(config: &Config, burn_seconds: u32) -> Result<DemoReport> {
    let store = MemoryStore::new();
    let alice = device(config, &store)?;
    let bob = device(config, &store)?;

    for (client, handle) in [(&alice, "alice"), (&bob, "bob")] {
        client
            .register(handle, &secret(PASSPHRASE), &secret(REAL_PIN), &secret(DECOY_PIN))
            .await?;
        let mode = unlock(client, handle, REAL_PIN).await?;
        info!(handle, %mode, "device unlocked");
    }
    alice.update_policy(None, Some(burn_seconds)).await?;

    let request = alice.send_request("bob").await?;
    info!(fingerprint = %request.handshake_fingerprint, "handshake sent");
    bob.respond(&request.id, HandshakeDecision::Accept).await?;
    let bob_id = alice
        .contacts()
        .await?
        .into_iter()
        .find(|c| c.handle == "bob")
        .ok_or_else(|| anyhow!("handshake did not produce a contact"))?
        .id;

    let cover = alice.suggest_covers().await.into_iter().next();
    let sent = alice
        .send(&bob_id, Payload::text("The package is under the bench."), cover)
        .await?;
    info!(message_id = %sent.id, cover = %sent.cover_text, "message sent");

    let revealed = bob.reveal(&sent.id).await?;
    let revealed_text = revealed
        .content
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("expected a text payload"))?;
    info!(purge_at = %revealed.purge_at, "message revealed");

    tokio::time::sleep(Duration::from_secs(u64::from(burn_seconds)) + Duration::from_millis(500))
        .await;
    let final_status = alice
        .conversation(&bob_id)
        .await?
        .into_iter()
        .find(|m| m.id == sent.id)
        .map(|m| m.status)
        .ok_or_else(|| anyhow!("message vanished from the conversation"))?;
    info!(status = final_status.as_str(), "after burn timer");

    bob.logout().await;
    let mode = unlock(&bob, "bob", DECOY_PIN).await?;
    info!(%mode, "bob reopened under duress");
    let decoy_contacts = bob
        .contacts()
        .await?
        .into_iter()
        .map(|c| c.display_name)
        .collect();

    alice.logout().await;
    bob.logout().await;

    Ok(DemoReport {
        cover_text: sent.cover_text,
        revealed_text,
        final_status,
        decoy_contacts,
    })
}
