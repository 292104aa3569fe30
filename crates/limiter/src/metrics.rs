use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Atomic counters tracking admission outcomes.
///
/// All counters use relaxed ordering for maximum throughput. For a
/// consistent point-in-time view, call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct LimiterMetrics {
    /// Requests admitted.
    pub admitted: AtomicU64,
    /// Requests rejected over a limit.
    pub rejected: AtomicU64,
    /// Requests annotated instead of rejected (lazy mode).
    pub lazy_rejected: AtomicU64,
    /// Compensating decrements issued after a rejection.
    pub rollbacks: AtomicU64,
    /// Rollbacks that failed to reach the remote store.
    pub rollback_failures: AtomicU64,
    /// Operations that fell back to the local tier because the remote
    /// store errored or is absent.
    pub degraded_to_local: AtomicU64,
    /// Buffered increments flushed to the remote store.
    pub flushed_increments: AtomicU64,
    /// Parallel slots held at admit time.
    pub parallel_held: AtomicU64,
    /// Parallel slots released post-call.
    pub parallel_released: AtomicU64,
}

impl LimiterMetrics {
    /// Increment the admitted counter.
    pub fn increment_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the rejected counter.
    pub fn increment_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the lazy-rejected counter.
    pub fn increment_lazy_rejected(&self) {
        self.lazy_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the rollback counter.
    pub fn increment_rollbacks(&self) {
        self.rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the rollback-failure counter.
    pub fn increment_rollback_failures(&self) {
        self.rollback_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the degraded-to-local counter.
    pub fn increment_degraded_to_local(&self) {
        self.degraded_to_local.fetch_add(1, Ordering::Relaxed);
    }

    /// Add to the flushed-increment counter.
    pub fn add_flushed_increments(&self, count: u64) {
        self.flushed_increments.fetch_add(count, Ordering::Relaxed);
    }

    /// Increment the parallel-held counter.
    pub fn increment_parallel_held(&self) {
        self.parallel_held.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the parallel-released counter.
    pub fn increment_parallel_released(&self) {
        self.parallel_released.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture a point-in-time view of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            lazy_rejected: self.lazy_rejected.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
            rollback_failures: self.rollback_failures.load(Ordering::Relaxed),
            degraded_to_local: self.degraded_to_local.load(Ordering::Relaxed),
            flushed_increments: self.flushed_increments.load(Ordering::Relaxed),
            parallel_held: self.parallel_held.load(Ordering::Relaxed),
            parallel_released: self.parallel_released.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`LimiterMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub admitted: u64,
    pub rejected: u64,
    pub lazy_rejected: u64,
    pub rollbacks: u64,
    pub rollback_failures: u64,
    pub degraded_to_local: u64,
    pub flushed_increments: u64,
    pub parallel_held: u64,
    pub parallel_released: u64,
}
