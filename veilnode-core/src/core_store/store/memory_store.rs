//! In-Memory Remote Store
//!
//! Single-process implementation of [`RemoteStore`] used by tests and the
//! CLI. All collections sit behind one lock so batches and compare-and-update
//! are atomic.

use super::errors::{StoreError, StoreResult};
use super::remote::{
    matches_all, Batch, Document, Entry, Filter, Precondition, RemoteStore, Subscription, WriteOp,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::debug;

type Collections = HashMap<String, BTreeMap<String, Document>>;

struct Inner {
    collections: RwLock<Collections>,
    changes: broadcast::Sender<String>,
    available: AtomicBool,
}

impl Inner {
    fn check_available(&self) -> StoreResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }

    fn notify(&self, collection: &str) {
        // No receivers is fine
        let _ = self.changes.send(collection.to_string());
    }

    async fn snapshot(&self, collection: &str, filters: &[Filter]) -> Vec<Entry> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| matches_all(filters, doc))
                    .map(|(id, doc)| (id.clone(), doc.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// In-memory store (for testing and local demos)
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                collections: RwLock::new(HashMap::new()),
                changes,
                available: AtomicBool::new(true),
            }),
        }
    }

    /// Simulate the store going offline or coming back
    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Number of documents in a collection
    pub async fn count(&self, collection: &str) -> usize {
        let collections = self.inner.collections.read().await;
        collections.get(collection).map(|c| c.len()).unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn precondition_holds(collections: &Collections, pre: &Precondition) -> bool {
    let present = |collection: &str, id: &str| {
        collections
            .get(collection)
            .map(|c| c.contains_key(id))
            .unwrap_or(false)
    };
    match pre {
        Precondition::Exists { collection, id } => present(collection, id),
        Precondition::Absent { collection, id } => !present(collection, id),
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.inner.check_available()?;
        let collections = self.inner.collections.read().await;
        Ok(collections.get(collection).and_then(|c| c.get(id)).cloned())
    }

    async fn set(&self, collection: &str, id: &str, doc: Document) -> StoreResult<()> {
        self.inner.check_available()?;
        {
            let mut collections = self.inner.collections.write().await;
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), doc);
        }
        self.inner.notify(collection);
        Ok(())
    }

    async fn insert_new(&self, collection: &str, id: &str, doc: Document) -> StoreResult<bool> {
        self.inner.check_available()?;
        {
            let mut collections = self.inner.collections.write().await;
            let docs = collections.entry(collection.to_string()).or_default();
            if docs.contains_key(id) {
                return Ok(false);
            }
            docs.insert(id.to_string(), doc);
        }
        self.inner.notify(collection);
        Ok(true)
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> StoreResult<()> {
        self.inner.check_available()?;
        {
            let mut collections = self.inner.collections.write().await;
            let doc = collections
                .get_mut(collection)
                .and_then(|c| c.get_mut(id))
                .ok_or_else(|| StoreError::not_found(collection, id))?;
            doc.extend(fields);
        }
        self.inner.notify(collection);
        Ok(())
    }

    async fn compare_and_update(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        expected: &Value,
        fields: Document,
    ) -> StoreResult<bool> {
        self.inner.check_available()?;
        {
            let mut collections = self.inner.collections.write().await;
            let doc = collections
                .get_mut(collection)
                .and_then(|c| c.get_mut(id))
                .ok_or_else(|| StoreError::not_found(collection, id))?;
            if doc.get(field) != Some(expected) {
                debug!(collection, id, field, "compare-and-update lost");
                return Ok(false);
            }
            doc.extend(fields);
        }
        self.inner.notify(collection);
        Ok(true)
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        self.inner.check_available()?;
        let removed = {
            let mut collections = self.inner.collections.write().await;
            collections
                .get_mut(collection)
                .and_then(|c| c.remove(id))
                .is_some()
        };
        if removed {
            self.inner.notify(collection);
        }
        Ok(removed)
    }

    async fn query(&self, collection: &str, filters: &[Filter]) -> StoreResult<Vec<Entry>> {
        self.inner.check_available()?;
        Ok(self.inner.snapshot(collection, filters).await)
    }

    async fn commit(&self, batch: Batch) -> StoreResult<bool> {
        self.inner.check_available()?;
        let mut touched: Vec<String> = Vec::new();
        {
            let mut collections = self.inner.collections.write().await;
            if !batch
                .preconditions
                .iter()
                .all(|pre| precondition_holds(&collections, pre))
            {
                debug!("batch preconditions failed");
                return Ok(false);
            }
            for op in batch.writes {
                match op {
                    WriteOp::Set {
                        collection,
                        id,
                        doc,
                    } => {
                        collections
                            .entry(collection.clone())
                            .or_default()
                            .insert(id, doc);
                        touched.push(collection);
                    }
                    WriteOp::Delete { collection, id } => {
                        if let Some(docs) = collections.get_mut(&collection) {
                            docs.remove(&id);
                        }
                        touched.push(collection);
                    }
                }
            }
        }
        touched.sort();
        touched.dedup();
        for collection in &touched {
            self.inner.notify(collection);
        }
        Ok(true)
    }

    async fn subscribe(&self, collection: &str, filters: Vec<Filter>) -> StoreResult<Subscription> {
        self.inner.check_available()?;
        let (tx, rx) = mpsc::channel(16);
        let mut changes = self.inner.changes.subscribe();
        let inner = Arc::clone(&self.inner);
        let watched = collection.to_string();

        let task = tokio::spawn(async move {
            let initial = inner.snapshot(&watched, &filters).await;
            if tx.send(initial).await.is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(changed) if changed != watched => continue,
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                if !inner.available.load(Ordering::SeqCst) {
                    continue;
                }
                let current = inner.snapshot(&watched, &filters).await;
                if tx.send(current).await.is_err() {
                    break;
                }
            }
        });

        Ok(Subscription::new(rx, task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let store = MemoryStore::new();
        store.set("c", "1", doc(json!({"a": 1}))).await.unwrap();
        assert_eq!(store.get("c", "1").await.unwrap().unwrap()["a"], 1);
        assert!(store.delete("c", "1").await.unwrap());
        assert!(!store.delete("c", "1").await.unwrap());
        assert!(store.get("c", "1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_insert_new_is_exclusive() {
        let store = MemoryStore::new();
        assert!(store.insert_new("c", "alice", doc(json!({"n": 1}))).await.unwrap());
        assert!(!store.insert_new("c", "alice", doc(json!({"n": 2}))).await.unwrap());
        assert_eq!(store.get("c", "alice").await.unwrap().unwrap()["n"], 1);
    }

    #[tokio::test]
    async fn test_compare_and_update() {
        let store = MemoryStore::new();
        store.set("m", "1", doc(json!({"status": "sent"}))).await.unwrap();

        let won = store
            .compare_and_update("m", "1", "status", &json!("sent"), doc(json!({"status": "revealed"})))
            .await
            .unwrap();
        assert!(won);

        let again = store
            .compare_and_update("m", "1", "status", &json!("sent"), doc(json!({"status": "revealed"})))
            .await
            .unwrap();
        assert!(!again);

        let missing = store
            .compare_and_update("m", "2", "status", &json!("sent"), Document::new())
            .await;
        assert!(matches!(missing, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = MemoryStore::new();
        store.set("c", "1", doc(json!({"a": 1, "b": 2}))).await.unwrap();
        store.update("c", "1", doc(json!({"b": 3, "c": null}))).await.unwrap();
        let stored = store.get("c", "1").await.unwrap().unwrap();
        assert_eq!(stored["a"], 1);
        assert_eq!(stored["b"], 3);
        assert!(stored["c"].is_null());
    }

    #[tokio::test]
    async fn test_commit_respects_preconditions() {
        let store = MemoryStore::new();
        let batch = Batch::new()
            .require_exists("requests", "r1")
            .set("contacts", "x", Document::new());
        assert!(!store.commit(batch.clone()).await.unwrap());
        assert_eq!(store.count("contacts").await, 0);

        store.set("requests", "r1", Document::new()).await.unwrap();
        let batch = batch.delete("requests", "r1");
        assert!(store.commit(batch).await.unwrap());
        assert_eq!(store.count("contacts").await, 1);
        assert_eq!(store.count("requests").await, 0);
    }

    #[tokio::test]
    async fn test_query_filters() {
        let store = MemoryStore::new();
        store.set("m", "1", doc(json!({"to": "b"}))).await.unwrap();
        store.set("m", "2", doc(json!({"to": "c"}))).await.unwrap();
        let hits = store.query("m", &[Filter::eq("to", "b")]).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "1");
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryStore::new();
        store.set_available(false);
        let err = store.get("c", "1").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        store.set_available(true);
        assert!(store.get("c", "1").await.is_ok());
    }

    #[tokio::test]
    async fn test_subscription_pushes_changes() {
        let store = MemoryStore::new();
        let mut sub = store
            .subscribe("requests", vec![Filter::eq("receiverId", "u_b")])
            .await
            .unwrap();
        assert!(sub.recv().await.unwrap().is_empty());

        store
            .set("requests", "r1", doc(json!({"receiverId": "u_b"})))
            .await
            .unwrap();
        let snapshot = sub.recv().await.unwrap();
        assert_eq!(snapshot.len(), 1);

        store.delete("requests", "r1").await.unwrap();
        assert!(sub.recv().await.unwrap().is_empty());
    }
}
