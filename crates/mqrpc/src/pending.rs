//! Pending-call table
//!
//! Every in-flight synchronous attempt owns one entry keyed by its
//! correlation id. Resolution removes the entry before completing it, so
//! whichever of the reply consumer and the caller's timeout gets to the
//! entry first wins and the other finds nothing.

use mqrpc_core::CorrelationId;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::debug;

struct PendingCall {
    command: String,
    created_at: Instant,
    completion: oneshot::Sender<Option<Value>>,
}

/// In-flight synchronous calls of one client
#[derive(Default)]
pub struct PendingCalls {
    calls: Mutex<HashMap<CorrelationId, PendingCall>>,
}

impl PendingCalls {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry and return the receiver its result arrives on
    pub fn register(
        &self,
        correlation_id: CorrelationId,
        command: &str,
    ) -> oneshot::Receiver<Option<Value>> {
        let (completion, receiver) = oneshot::channel();
        self.calls.lock().insert(
            correlation_id,
            PendingCall {
                command: command.to_string(),
                created_at: Instant::now(),
                completion,
            },
        );
        receiver
    }

    /// Complete the entry for `correlation_id`.
    ///
    /// Returns false when there is no such entry (already resolved, timed
    /// out, or never registered) or when its caller has stopped waiting.
    pub fn resolve(&self, correlation_id: &CorrelationId, result: Option<Value>) -> bool {
        let Some(call) = self.calls.lock().remove(correlation_id) else {
            return false;
        };
        debug!(
            correlation_id = %correlation_id,
            command = %call.command,
            elapsed_ms = call.created_at.elapsed().as_millis() as u64,
            "Pending call resolved"
        );
        call.completion.send(result).is_ok()
    }

    /// Drop the entry for `correlation_id` without completing it
    pub fn cancel(&self, correlation_id: &CorrelationId) -> bool {
        self.calls.lock().remove(correlation_id).is_some()
    }

    /// Guard that removes the entry for `correlation_id` when dropped,
    /// including when the waiting future itself is dropped
    pub fn guard(&self, correlation_id: CorrelationId) -> PendingGuard<'_> {
        PendingGuard {
            calls: self,
            correlation_id,
        }
    }

    /// Drop every entry; waiting callers observe a closed channel
    pub fn clear(&self) -> usize {
        let mut calls = self.calls.lock();
        let count = calls.len();
        calls.clear();
        count
    }

    /// Number of in-flight calls
    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    /// Whether nothing is in flight
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scoped ownership of one pending entry
#[must_use = "the entry is removed as soon as the guard is dropped"]
pub struct PendingGuard<'a> {
    calls: &'a PendingCalls,
    correlation_id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.calls.cancel(&self.correlation_id);
    }
}

impl std::fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCalls")
            .field("in_flight", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn resolves_exactly_once() {
        let pending = PendingCalls::new();
        let id = CorrelationId::new();
        let receiver = pending.register(id, "getTotal");
        assert_eq!(pending.len(), 1);

        assert!(pending.resolve(&id, Some(json!(100))));
        assert!(!pending.resolve(&id, Some(json!(200))));
        assert!(pending.is_empty());
        assert_eq!(receiver.await.unwrap(), Some(json!(100)));
    }

    #[tokio::test]
    async fn cancelled_entries_ignore_late_replies() {
        let pending = PendingCalls::new();
        let id = CorrelationId::new();
        let _receiver = pending.register(id, "getTotal");
        assert!(pending.cancel(&id));
        assert!(!pending.cancel(&id));
        assert!(!pending.resolve(&id, None));
    }

    #[tokio::test]
    async fn guard_removes_entry_on_drop() {
        let pending = PendingCalls::new();
        let id = CorrelationId::new();
        let receiver = pending.register(id, "getTotal");
        {
            let _entry = pending.guard(id);
            assert_eq!(pending.len(), 1);
        }
        assert!(pending.is_empty());
        assert!(receiver.await.is_err());
    }

    #[test]
    fn guard_after_resolution_is_harmless() {
        let pending = PendingCalls::new();
        let id = CorrelationId::new();
        let _receiver = pending.register(id, "getTotal");
        let entry = pending.guard(id);
        assert!(pending.resolve(&id, None));
        drop(entry);
        assert!(pending.is_empty());
    }

    #[test]
    fn unknown_ids_do_not_resolve() {
        let pending = PendingCalls::new();
        assert!(!pending.resolve(&CorrelationId::new(), Some(json!(1))));
    }

    #[tokio::test]
    async fn clear_closes_waiters() {
        let pending = PendingCalls::new();
        let receiver = pending.register(CorrelationId::new(), "getTotal");
        assert_eq!(pending.clear(), 1);
        assert!(receiver.await.is_err());
    }

    #[tokio::test]
    async fn concurrent_resolution_has_one_winner() {
        let pending = std::sync::Arc::new(PendingCalls::new());
        let id = CorrelationId::new();
        let receiver = pending.register(id, "getTotal");

        let racers: Vec<_> = (0..8)
            .map(|i| {
                let pending = pending.clone();
                tokio::spawn(async move { pending.resolve(&id, Some(json!(i))) })
            })
            .collect();
        let mut winners = 0;
        for racer in racers {
            if racer.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(receiver.await.unwrap().is_some());
    }
}
