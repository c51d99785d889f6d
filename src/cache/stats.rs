//! Cache Statistics Module
//!
//! Tracks how the namespaced cache is being served: hits, misses, writes,
//! and calls that degraded because the store was unavailable or failed.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Lock-free counters shared by every clone of the cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    unavailable: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    /// Operations answered with a failure sentinel
    pub unavailable: u64,
    pub hit_rate: f64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unavailable(&self) {
        self.unavailable.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Returns current counters. Hit rate is hits / (hits + misses), or 0.0
    /// when no reads have been made.
    pub fn snapshot(&self) -> StatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        StatsSnapshot {
            hits,
            misses,
            writes: self.writes.load(Ordering::Relaxed),
            unavailable: self.unavailable.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let snapshot = CacheStats::new().snapshot();
        assert_eq!(snapshot, StatsSnapshot::default());
    }

    #[test]
    fn test_hit_rate_no_requests() {
        assert_eq!(CacheStats::new().snapshot().hit_rate, 0.0);
    }

    #[test]
    fn test_hit_rate_calculation() {
        let stats = CacheStats::new();
        for _ in 0..3 {
            stats.record_hit();
        }
        stats.record_miss();

        assert!((stats.snapshot().hit_rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_writes_and_unavailable_do_not_affect_hit_rate() {
        let stats = CacheStats::new();
        stats.record_hit();
        stats.record_write();
        stats.record_unavailable();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.writes, 1);
        assert_eq!(snapshot.unavailable, 1);
        assert_eq!(snapshot.hit_rate, 1.0);
    }
}
