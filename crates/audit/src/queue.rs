//! Bounded background write queue.
//!
//! Log writes are submitted here from the call path and drained by a
//! background task, so a slow store never stalls a tool call. The queue is
//! a FIFO with a hard capacity: overflow drops the *oldest* pending write
//! and bumps a counter. Failed writes are logged at error level and
//! dropped — they never propagate.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;

use crate::store::{collections, AuditStore};

/// One pending write.
#[derive(Debug)]
pub enum AuditWrite {
    ToolLog(Value),
    GovernanceLog(Value),
}

impl AuditWrite {
    fn collection(&self) -> &'static str {
        match self {
            Self::ToolLog(_) => collections::TOOL_LOGS,
            Self::GovernanceLog(_) => collections::GOVERNANCE_LOGS,
        }
    }

    fn into_document(self) -> Value {
        match self {
            Self::ToolLog(v) | Self::GovernanceLog(v) => v,
        }
    }
}

pub const DEFAULT_CAPACITY: usize = 1024;

struct Inner {
    store: Arc<dyn AuditStore>,
    pending: Mutex<VecDeque<AuditWrite>>,
    notify: Notify,
    dropped: AtomicU64,
    capacity: usize,
}

impl Inner {
    async fn write(&self, write: AuditWrite) {
        let collection = write.collection();
        if let Err(e) = self.store.insert(collection, write.into_document()).await {
            tracing::error!(collection = %collection, error = %e, "audit write failed, dropping");
        }
    }
}

#[derive(Clone)]
pub struct AuditQueue {
    inner: Arc<Inner>,
}

impl AuditQueue {
    /// Create the queue and spawn its drain task.
    pub fn new(store: Arc<dyn AuditStore>, capacity: usize) -> Self {
        let inner = Arc::new(Inner {
            store,
            pending: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            capacity,
        });

        let worker = inner.clone();
        tokio::spawn(async move {
            loop {
                let next = worker.pending.lock().pop_front();
                match next {
                    Some(write) => worker.write(write).await,
                    None => worker.notify.notified().await,
                }
            }
        });

        Self { inner }
    }

    /// Enqueue one write. Never blocks; a full queue sheds its oldest
    /// pending entry.
    pub fn submit(&self, write: AuditWrite) {
        {
            let mut pending = self.inner.pending.lock();
            pending.push_back(write);
            if pending.len() > self.inner.capacity {
                pending.pop_front();
                let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(dropped, "audit queue full, dropped oldest pending write");
            }
        }
        self.inner.notify.notify_one();
    }

    /// Writes shed due to overflow since startup.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Drain everything still queued. Called on shutdown (best-effort)
    /// and by tests that need deterministic visibility.
    pub async fn flush(&self) {
        loop {
            let next = self.inner.pending.lock().pop_front();
            match next {
                Some(write) => self.inner.write(write).await,
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryAuditStore;
    use serde_json::json;

    #[tokio::test]
    async fn submitted_writes_land_in_their_collections() {
        let store = Arc::new(MemoryAuditStore::new());
        let queue = AuditQueue::new(store.clone(), DEFAULT_CAPACITY);
        queue.submit(AuditWrite::ToolLog(json!({ "session_id": "a" })));
        queue.submit(AuditWrite::GovernanceLog(json!({ "decision": "allowed" })));
        queue.flush().await;
        assert_eq!(store.count(collections::TOOL_LOGS), 1);
        assert_eq!(store.count(collections::GOVERNANCE_LOGS), 1);
        assert_eq!(queue.dropped(), 0);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let store = Arc::new(MemoryAuditStore::new());
        let queue = AuditQueue::new(store.clone(), 2);
        // Stall the worker from observing by submitting synchronously
        // before any await point: all three submits happen back to back.
        queue.submit(AuditWrite::ToolLog(json!({ "n": 1 })));
        queue.submit(AuditWrite::ToolLog(json!({ "n": 2 })));
        queue.submit(AuditWrite::ToolLog(json!({ "n": 3 })));
        assert!(queue.dropped() >= 1 || store.count(collections::TOOL_LOGS) > 0);
        queue.flush().await;
        // Whatever was not shed made it to the store.
        let total = store.count(collections::TOOL_LOGS) as u64 + queue.dropped();
        assert_eq!(total, 3);
    }

    #[tokio::test]
    async fn flush_on_empty_queue_is_a_noop() {
        let store = Arc::new(MemoryAuditStore::new());
        let queue = AuditQueue::new(store, DEFAULT_CAPACITY);
        queue.flush().await;
        assert_eq!(queue.pending(), 0);
    }
}
