//! Deferred purge tasks
//!
//! At most one pending purge per message. Tasks can be cancelled
//! individually or all at once; a finished task removes its own entry.

use crate::core_store::model::MessageId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::debug;

#[derive(Clone, Default)]
pub struct PurgeScheduler {
    pending: Arc<Mutex<HashMap<MessageId, AbortHandle>>>,
}

impl PurgeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `purge` after `delay`. Returns false if one is already pending.
    pub async fn schedule<F>(&self, id: MessageId, delay: Duration, purge: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Hold the lock across spawn so the task cannot remove its entry early
        let mut pending = self.pending.lock().await;
        if pending.contains_key(&id) {
            debug!(message_id = %id, "purge already scheduled");
            return false;
        }

        let registry = Arc::clone(&self.pending);
        let task_id = id.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            purge.await;
            registry.lock().await.remove(&task_id);
        });

        debug!(message_id = %id, delay_ms = delay.as_millis() as u64, "purge scheduled");
        pending.insert(id, handle.abort_handle());
        true
    }

    pub async fn cancel(&self, id: &MessageId) -> bool {
        match self.pending.lock().await.remove(id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self) {
        for (_, handle) in self.pending.lock().await.drain() {
            handle.abort();
        }
    }

    pub async fn is_pending(&self, id: &MessageId) -> bool {
        self.pending.lock().await.contains_key(id)
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
