//! Typed access to the remote collections
//!
//! Every document crossing the boundary goes through [`encode`] or
//! [`decode`]; decoding always validates.

use super::errors::{StoreError, StoreResult, ValidationError};
use super::remote::{Document, Entry, Filter, RemoteStore};
use crate::core_store::model::{
    ContactRecord, ContactRequest, Credential, EphemeralMessage, EscrowRecord, Identity,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

pub const CREDENTIALS: &str = "credentials";
pub const IDENTITIES: &str = "identities";
pub const REQUESTS: &str = "requests";
pub const CONTACTS: &str = "contacts";
pub const MESSAGES: &str = "messages";
pub const MESSAGE_KEYS: &str = "message_keys";

/// A model stored in one fixed collection
pub trait StoredDocument: Serialize + DeserializeOwned {
    const COLLECTION: &'static str;

    fn validate(&self) -> Result<(), ValidationError>;
}

impl StoredDocument for Credential {
    const COLLECTION: &'static str = CREDENTIALS;

    fn validate(&self) -> Result<(), ValidationError> {
        Credential::validate(self)
    }
}

impl StoredDocument for Identity {
    const COLLECTION: &'static str = IDENTITIES;

    fn validate(&self) -> Result<(), ValidationError> {
        Identity::validate(self)
    }
}

impl StoredDocument for ContactRequest {
    const COLLECTION: &'static str = REQUESTS;

    fn validate(&self) -> Result<(), ValidationError> {
        ContactRequest::validate(self)
    }
}

impl StoredDocument for ContactRecord {
    const COLLECTION: &'static str = CONTACTS;

    fn validate(&self) -> Result<(), ValidationError> {
        ContactRecord::validate(self)
    }
}

impl StoredDocument for EphemeralMessage {
    const COLLECTION: &'static str = MESSAGES;

    fn validate(&self) -> Result<(), ValidationError> {
        EphemeralMessage::validate(self)
    }
}

impl StoredDocument for EscrowRecord {
    const COLLECTION: &'static str = MESSAGE_KEYS;

    fn validate(&self) -> Result<(), ValidationError> {
        EscrowRecord::validate(self)
    }
}

/// Serialize a model into a document
pub fn encode<T: Serialize>(value: &T) -> StoreResult<Document> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::Serialization(format!(
            "expected an object, got {}",
            other
        ))),
        Err(e) => Err(StoreError::Serialization(e.to_string())),
    }
}

/// Decode and validate a document read from `T::COLLECTION`
pub fn decode<T: StoredDocument>(id: &str, doc: Document) -> StoreResult<T> {
    let value: T = serde_json::from_value(Value::Object(doc))
        .map_err(|e| StoreError::invalid(T::COLLECTION, id, e))?;
    value
        .validate()
        .map_err(|e| StoreError::invalid(T::COLLECTION, id, e))?;
    Ok(value)
}

pub async fn fetch<T: StoredDocument>(store: &dyn RemoteStore, id: &str) -> StoreResult<Option<T>> {
    match store.get(T::COLLECTION, id).await? {
        Some(doc) => decode(id, doc).map(Some),
        None => Ok(None),
    }
}

pub async fn put<T: StoredDocument>(store: &dyn RemoteStore, id: &str, value: &T) -> StoreResult<()> {
    store.set(T::COLLECTION, id, encode(value)?).await
}

pub async fn find<T: StoredDocument>(
    store: &dyn RemoteStore,
    filters: &[Filter],
) -> StoreResult<Vec<T>> {
    let entries = store.query(T::COLLECTION, filters).await?;
    decode_all(entries)
}

/// Decode a query result, failing on the first bad document
pub fn decode_all<T: StoredDocument>(entries: Vec<Entry>) -> StoreResult<Vec<T>> {
    entries
        .into_iter()
        .map(|(id, doc)| decode(&id, doc))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::model::{ContactStatus, IdentityId, Timestamp};
    use crate::core_store::store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn test_typed_roundtrip_through_store() {
        let store = MemoryStore::new();
        let record = ContactRecord {
            owner_id: IdentityId::new("u_a"),
            counterpart_id: IdentityId::new("u_b"),
            status: ContactStatus::Accepted,
            handshake_fingerprint: "HS-00FF".to_string(),
            added_at: Timestamp::from_millis(3),
        };
        put(&store, &record.document_id(), &record).await.unwrap();

        let loaded: ContactRecord = fetch(&store, "u_a:u_b").await.unwrap().unwrap();
        assert_eq!(loaded, record);

        let found: Vec<ContactRecord> = find(&store, &[Filter::eq("ownerId", "u_a")])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_document_is_rejected() {
        let store = MemoryStore::new();
        let bad = json!({"ownerId": "u_a", "counterpartId": "u_b", "status": "accepted",
                         "handshakeFingerprint": "nope", "addedAt": 1});
        store
            .set(CONTACTS, "u_a:u_b", bad.as_object().cloned().unwrap())
            .await
            .unwrap();
        let err = fetch::<ContactRecord>(&store, "u_a:u_b").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument { .. }));

        store
            .set(CONTACTS, "x", json!({"ownerId": 5}).as_object().cloned().unwrap())
            .await
            .unwrap();
        let err = fetch::<ContactRecord>(&store, "x").await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidDocument { .. }));
    }
}
