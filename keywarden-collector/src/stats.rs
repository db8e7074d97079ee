//! Collector-level counters.
//!
//! Shared by the subscriber pipeline and the store; lock-free because they
//! are bumped on every incoming message.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct CollectorStats {
    received: AtomicU64,
    rejected: AtomicU64,
    stored: AtomicU64,
    failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSnapshot {
    pub metrics_received: u64,
    pub metrics_rejected: u64,
    pub metrics_stored: u64,
    pub metrics_failures: u64,
}

impl CollectorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stored_batch(&self, count: u64) {
        self.stored.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            metrics_received: self.received.load(Ordering::Relaxed),
            metrics_rejected: self.rejected.load(Ordering::Relaxed),
            metrics_stored: self.stored.load(Ordering::Relaxed),
            metrics_failures: self.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let stats = CollectorStats::new();
        stats.record_received();
        stats.record_received();
        stats.record_rejected();
        stats.record_stored();
        stats.record_stored_batch(5);
        stats.record_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.metrics_received, 2);
        assert_eq!(snap.metrics_rejected, 1);
        assert_eq!(snap.metrics_stored, 6);
        assert_eq!(snap.metrics_failures, 1);
    }
}
