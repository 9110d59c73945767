//! Dispatch counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters of one server's dispatchers
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    received: AtomicU64,
    rejected: AtomicU64,
    not_found: AtomicU64,
    completed: AtomicU64,
    handler_failures: AtomicU64,
    replies_published: AtomicU64,
    reply_failures: AtomicU64,
    slow_calls: AtomicU64,
    acked: AtomicU64,
    ack_failures: AtomicU64,
    aborted: AtomicU64,
}

/// Point-in-time copy of [`DispatchMetrics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Deliveries taken off a request destination
    pub received: u64,
    /// Deliveries whose envelope could not be parsed
    pub rejected: u64,
    /// Parsed requests with no registered handler
    pub not_found: u64,
    /// Handler invocations that returned normally
    pub completed: u64,
    /// Handler invocations that failed or panicked
    pub handler_failures: u64,
    /// Responses published for synchronous requests
    pub replies_published: u64,
    /// Responses that could not be published
    pub reply_failures: u64,
    /// Invocations slower than the configured threshold
    pub slow_calls: u64,
    /// Deliveries acknowledged
    pub acked: u64,
    /// Acknowledgments the transport refused
    pub ack_failures: u64,
    /// Deliveries whose processing panicked outside the handler
    pub aborted: u64,
}

macro_rules! counters {
    ($($field:ident => $record:ident),* $(,)?) => {
        impl DispatchMetrics {
            $(
                pub(crate) fn $record(&self) {
                    self.$field.fetch_add(1, Ordering::Relaxed);
                }
            )*

            /// Copy the current counter values
            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $($field: self.$field.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters! {
    received => record_received,
    rejected => record_rejected,
    not_found => record_not_found,
    completed => record_completed,
    handler_failures => record_handler_failure,
    replies_published => record_reply_published,
    reply_failures => record_reply_failure,
    slow_calls => record_slow_call,
    acked => record_acked,
    ack_failures => record_ack_failure,
    aborted => record_aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_records() {
        let metrics = DispatchMetrics::default();
        metrics.record_received();
        metrics.record_received();
        metrics.record_rejected();
        metrics.record_acked();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.received, 2);
        assert_eq!(snapshot.rejected, 1);
        assert_eq!(snapshot.acked, 1);
        assert_eq!(snapshot.completed, 0);

        let json = serde_json::to_value(snapshot).unwrap();
        assert_eq!(json["received"], 2);
    }
}
