//! In-flight correlated calls awaiting a reply on the push stream

use super::protocol::RpcError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;

/// Outcome delivered to a waiting caller
pub type Reply = std::result::Result<Value, RpcError>;

/// Table of pending requests keyed by a process-unique identifier.
///
/// Resolution removes the entry and signals the waiter under one lock, so a
/// waiter is woken at most once and a late reply for an evicted entry is a
/// no-op.
#[derive(Debug)]
pub struct PendingRequests {
    next_id: AtomicU64,
    waiters: Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    /// Create an empty table; identifiers start at 1
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            waiters: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh identifier and register its wait handle.
    ///
    /// The returned guard evicts the entry when dropped.
    pub fn register(self: &Arc<Self>) -> (PendingGuard, oneshot::Receiver<Reply>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.lock().insert(id, tx);
        let guard = PendingGuard {
            id,
            table: Arc::clone(self),
        };
        (guard, rx)
    }

    /// Deliver a reply. Returns false if nobody is waiting for `id`.
    pub fn resolve(&self, id: u64, reply: Reply) -> bool {
        match self.lock().remove(&id) {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    /// Evict an entry; removing an absent id is a no-op
    pub fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Number of in-flight requests
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no request is in flight
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every waiter; their receivers observe a closed channel
    pub fn clear(&self) -> usize {
        let mut waiters = self.lock();
        let count = waiters.len();
        waiters.clear();
        count
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, oneshot::Sender<Reply>>> {
        // The map holds no invariant a panicking holder could break
        self.waiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Ownership of one pending entry; evicts it on drop
#[derive(Debug)]
pub struct PendingGuard {
    id: u64,
    table: Arc<PendingRequests>,
}

impl PendingGuard {
    /// Correlation identifier
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.table.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_ids_are_monotonic_and_start_at_one() {
        let table = Arc::new(PendingRequests::new());
        let (a, _rx_a) = table.register();
        let (b, _rx_b) = table.register();
        assert_eq!(a.id(), 1);
        assert_eq!(b.id(), 2);

        // Evicted ids are never handed out again
        drop(a);
        let (c, _rx_c) = table.register();
        assert_eq!(c.id(), 3);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_wakes_matching_waiter() {
        let table = Arc::new(PendingRequests::new());
        let (first, rx_first) = table.register();
        let (second, mut rx_second) = table.register();

        assert!(table.resolve(first.id(), Ok(json!("one"))));
        assert_eq!(rx_first.await.unwrap().unwrap(), json!("one"));

        assert!(rx_second.try_recv().is_err());
        assert_eq!(table.len(), 1);
        assert!(!table.resolve(first.id(), Ok(json!("again"))));
        assert!(table.resolve(second.id(), Ok(json!("two"))));
    }

    #[test]
    fn test_resolve_is_single_shot() {
        let table = Arc::new(PendingRequests::new());
        let (guard, _rx) = table.register();

        assert!(table.resolve(guard.id(), Ok(json!(1))));
        assert!(!table.resolve(guard.id(), Ok(json!(2))));
    }

    #[test]
    fn test_guard_drop_evicts_and_late_reply_is_ignored() {
        let table = Arc::new(PendingRequests::new());
        let (guard, _rx) = table.register();
        let id = guard.id();
        drop(guard);

        assert!(table.is_empty());
        assert!(!table.resolve(id, Ok(json!(null))));
        table.remove(id);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_clear_closes_waiters() {
        let table = Arc::new(PendingRequests::new());
        let (_guard, rx) = table.register();

        assert_eq!(table.clear(), 1);
        assert!(rx.await.is_err());
        assert!(table.is_empty());
    }
}
