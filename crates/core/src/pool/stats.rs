//! Pool statistics
//!
//! Counters are atomics so reads never contend with the pool's state lock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of a pool's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    /// Lookups that found a live value
    pub hits: u64,

    /// Lookups that found nothing, including degraded reads
    pub misses: u64,

    /// Entries written successfully
    pub saves: u64,

    /// Entries that failed to write
    pub save_failures: u64,

    /// Backend or decoding errors logged and swallowed
    pub errors: u64,
}

impl PoolStatsSnapshot {
    /// Calculate hit rate (hits / total lookups)
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Thread-safe counters for one pool
#[derive(Debug, Default)]
pub struct PoolStats {
    hits: AtomicU64,
    misses: AtomicU64,
    saves: AtomicU64,
    save_failures: AtomicU64,
    errors: AtomicU64,
}

impl PoolStats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_saves(&self, count: usize) {
        self.saves.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_save_failure(&self) {
        self.save_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current statistics snapshot
    pub fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            saves: self.saves.load(Ordering::Relaxed),
            save_failures: self.save_failures.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
