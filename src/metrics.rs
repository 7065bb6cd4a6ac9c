//! # Process Metrics
//!
//! Lock-free counters shared by the coordinator, the write-behind worker,
//! the pub/sub listener, and the operational surface. One `Metrics` value
//! lives on the server and is cloned by `Arc`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for everything the operator watches.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Durable writes applied by the worker
    pub writes_processed: AtomicU64,
    /// Durable writes that errored inside the worker
    pub writes_failed: AtomicU64,
    /// Mutations dropped because the write queue was full
    pub queue_overflow: AtomicU64,
    /// Queued writes abandoned at shutdown after the drain deadline
    pub writes_dropped_on_shutdown: AtomicU64,
    /// Pub/sub messages applied locally
    pub messages_received: AtomicU64,
    /// Pub/sub message handlers that failed (logged, never propagated)
    pub message_failures: AtomicU64,
    /// Events delivered to local sessions
    pub events_delivered: AtomicU64,
    /// Currently open sessions
    pub connections: AtomicU64,
    /// Sessions opened since boot
    pub connections_total: AtomicU64,
    /// Cumulative microseconds spent in durable writes
    pub write_micros_total: AtomicU64,
}

/// Point-in-time copy of the counters, serializable for `/metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub writes_processed: u64,
    pub writes_failed: u64,
    pub queue_overflow: u64,
    pub writes_dropped_on_shutdown: u64,
    pub messages_received: u64,
    pub message_failures: u64,
    pub events_delivered: u64,
    pub connections: u64,
    pub connections_total: u64,
    pub write_micros_total: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one.
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Add to a counter.
    pub fn add(counter: &AtomicU64, value: u64) {
        counter.fetch_add(value, Ordering::Relaxed);
    }

    /// Decrement a gauge-style counter, saturating at zero.
    pub fn decr(counter: &AtomicU64) {
        let _ = counter.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_sub(1))
        });
    }

    /// Copy every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            writes_processed: self.writes_processed.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
            queue_overflow: self.queue_overflow.load(Ordering::Relaxed),
            writes_dropped_on_shutdown: self.writes_dropped_on_shutdown.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            message_failures: self.message_failures.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            connections_total: self.connections_total.load(Ordering::Relaxed),
            write_micros_total: self.write_micros_total.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        Metrics::incr(&metrics.writes_processed);
        Metrics::incr(&metrics.writes_processed);
        Metrics::add(&metrics.write_micros_total, 1500);

        let snap = metrics.snapshot();
        assert_eq!(snap.writes_processed, 2);
        assert_eq!(snap.write_micros_total, 1500);
        assert_eq!(snap.writes_failed, 0);
    }

    #[test]
    fn test_decr_saturates() {
        let metrics = Metrics::new();
        Metrics::decr(&metrics.connections);
        assert_eq!(metrics.snapshot().connections, 0);

        Metrics::incr(&metrics.connections);
        Metrics::decr(&metrics.connections);
        assert_eq!(metrics.snapshot().connections, 0);
    }
}
