//! Counters kept by the history middleware.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters, updated from concurrent requests.
#[derive(Debug, Default)]
pub struct HistoryStats {
    retrieved: AtomicU64,
    missed: AtomicU64,
    rejected: AtomicU64,
    cached: AtomicU64,
    store_failed: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`HistoryStats`], keyed like crawler stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    #[serde(rename = "history/retrieved")]
    pub retrieved: u64,
    #[serde(rename = "history/missed")]
    pub missed: u64,
    #[serde(rename = "history/rejected")]
    pub rejected: u64,
    #[serde(rename = "history/cached")]
    pub cached: u64,
    #[serde(rename = "history/store_failed")]
    pub store_failed: u64,
    #[serde(rename = "history/errors")]
    pub errors: u64,
}

impl HistoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_retrieved(&self) {
        self.retrieved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_missed(&self) {
        self.missed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cached(&self) {
        self.cached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failed(&self) {
        self.store_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            retrieved: self.retrieved.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            cached: self.cached.load(Ordering::Relaxed),
            store_failed: self.store_failed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_counts() {
        let stats = HistoryStats::new();
        stats.record_retrieved();
        stats.record_retrieved();
        stats.record_missed();
        stats.record_error();

        let snap = stats.snapshot();
        assert_eq!(snap.retrieved, 2);
        assert_eq!(snap.missed, 1);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.cached, 0);
    }

    #[test]
    fn test_snapshot_serializes_with_stat_keys() {
        let stats = HistoryStats::new();
        stats.record_cached();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["history/cached"], 1);
        assert_eq!(json["history/store_failed"], 0);
    }
}
