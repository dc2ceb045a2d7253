//! Remote document store interface
//!
//! Documents are schemaless JSON objects grouped in named collections. Nothing
//! read through this trait is trusted; callers decode and validate via
//! [`super::collections`].

use super::errors::StoreResult;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A stored document
pub type Document = serde_json::Map<String, Value>;

/// A document together with its id
pub type Entry = (String, Document);

/// Query predicate; a query matches when every filter matches
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value
    Eq { field: String, value: Value },
    /// Field equals any of the values
    In { field: String, values: Vec<Value> },
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn any_of<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In {
            field: field.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::Eq { field, value } => doc.get(field) == Some(value),
            Filter::In { field, values } => doc
                .get(field)
                .map(|v| values.contains(v))
                .unwrap_or(false),
        }
    }
}

/// True when `doc` satisfies all `filters`
pub fn matches_all(filters: &[Filter], doc: &Document) -> bool {
    filters.iter().all(|f| f.matches(doc))
}

/// Condition checked atomically before a batch is applied
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    Exists { collection: String, id: String },
    Absent { collection: String, id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        collection: String,
        id: String,
        doc: Document,
    },
    Delete { collection: String, id: String },
}

/// Atomic multi-document write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    pub preconditions: Vec<Precondition>,
    pub writes: Vec<WriteOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_exists(mut self, collection: &str, id: &str) -> Self {
        self.preconditions.push(Precondition::Exists {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        self
    }

    pub fn require_absent(mut self, collection: &str, id: &str) -> Self {
        self.preconditions.push(Precondition::Absent {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        self
    }

    pub fn set(mut self, collection: &str, id: &str, doc: Document) -> Self {
        self.writes.push(WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            doc,
        });
        self
    }

    pub fn delete(mut self, collection: &str, id: &str) -> Self {
        self.writes.push(WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        self
    }
}

/// Push feed of a query's full result set
///
/// Yields the current matches once on creation and again after every change
/// to the watched collection. Dropping the subscription stops the feed.
pub struct Subscription {
    rx: mpsc::Receiver<Vec<Entry>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<Vec<Entry>>, task: JoinHandle<()>) -> Self {
        Self { rx, task }
    }

    /// Next snapshot, `None` once the feed has ended
    pub async fn recv(&mut self) -> Option<Vec<Entry>> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Document-oriented key-value store shared between devices
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Create or replace
    async fn set(&self, collection: &str, id: &str, doc: Document) -> StoreResult<()>;

    /// Create only if absent. Returns false when the id is taken.
    async fn insert_new(&self, collection: &str, id: &str, doc: Document) -> StoreResult<bool>;

    /// Merge `fields` into an existing document
    async fn update(&self, collection: &str, id: &str, fields: Document) -> StoreResult<()>;

    /// Merge `fields` only if `field` currently equals `expected`.
    /// Returns false when the comparison fails.
    async fn compare_and_update(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        expected: &Value,
        fields: Document,
    ) -> StoreResult<bool>;

    /// Returns whether a document was removed
    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool>;

    async fn query(&self, collection: &str, filters: &[Filter]) -> StoreResult<Vec<Entry>>;

    /// Apply all writes atomically if every precondition holds.
    /// Returns false, writing nothing, otherwise.
    async fn commit(&self, batch: Batch) -> StoreResult<bool>;

    async fn subscribe(&self, collection: &str, filters: Vec<Filter>) -> StoreResult<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_filters() {
        let d = doc(json!({"senderId": "u_a", "receiverId": "u_b"}));
        assert!(Filter::eq("senderId", "u_a").matches(&d));
        assert!(!Filter::eq("senderId", "u_b").matches(&d));
        assert!(!Filter::eq("missing", "u_a").matches(&d));
        assert!(Filter::any_of("receiverId", ["u_a", "u_b"]).matches(&d));
        assert!(!Filter::any_of("receiverId", ["u_c"]).matches(&d));
        assert!(matches_all(&[], &d));
    }

    #[test]
    fn test_batch_builder() {
        let batch = Batch::new()
            .require_exists("requests", "req_1")
            .set("contacts", "u_a:u_b", Document::new())
            .delete("requests", "req_1");
        assert_eq!(batch.preconditions.len(), 1);
        assert_eq!(batch.writes.len(), 2);
    }
}
