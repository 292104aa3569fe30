use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use tollbooth_state::{CounterError, CounterOp, CounterStore, WindowPair, WindowSlot};
use tollbooth_state_memory::MemoryCounterStore;

use crate::metrics::LimiterMetrics;

/// One coalesced remote increment awaiting the next flush.
#[derive(Debug, Clone, Copy)]
struct PendingIncrement {
    delta: i64,
    ttl: Option<Duration>,
}

/// Two-tier counter facade: a process-local cache in front of the shared
/// remote store.
///
/// Reads consult the local tier first; misses fall through to remote and
/// populate local with the remote's residual TTL. Remote failures never
/// surface: every operation degrades to the local tier, trading global
/// for per-instance enforcement until the store recovers.
///
/// Post-call adjustments are applied to the local tier immediately and
/// buffered for the remote store, coalesced per key and flushed on a
/// background interval. Delivery is at-most-once: a lost flush leaves
/// remote counters as best-effort lower bounds.
pub struct TieredCounters {
    local: MemoryCounterStore,
    remote: Option<Arc<dyn CounterStore>>,
    local_only: bool,
    metrics: Arc<LimiterMetrics>,
    pending: Mutex<HashMap<String, PendingIncrement>>,
}

impl TieredCounters {
    /// Create a facade over the given remote store. Pass `None` for
    /// remote (or set `local_only`) to run purely in-process.
    pub fn new(
        remote: Option<Arc<dyn CounterStore>>,
        local_only: bool,
        metrics: Arc<LimiterMetrics>,
    ) -> Self {
        Self {
            local: MemoryCounterStore::new(),
            remote,
            local_only,
            metrics,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// The remote tier, unless disabled.
    fn remote(&self) -> Option<&Arc<dyn CounterStore>> {
        if self.local_only {
            None
        } else {
            self.remote.as_ref()
        }
    }

    /// Read a counter, local tier first.
    pub async fn get(&self, key: &str) -> Option<i64> {
        match self.local.get(key).await {
            Ok(Some(value)) => return Some(value),
            Ok(None) => {}
            Err(e) => warn!(error = %e, key, "local tier read failed"),
        }

        let remote = self.remote()?;
        match remote.get(key).await {
            Ok(Some(value)) => {
                let ttl = remote.remaining_ttl(key).await.ok().flatten();
                if let Err(e) = self.local.set(key, value, ttl).await {
                    warn!(error = %e, key, "local tier populate failed");
                }
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, key, "remote read failed, serving local view");
                self.metrics.increment_degraded_to_local();
                None
            }
        }
    }

    /// Batch-read from the local tier only. Used for the pre-check that
    /// rejects without spending a remote write when the cached view
    /// already proves a counter over its limit.
    pub async fn batch_get_local(&self, keys: &[String]) -> Vec<Option<i64>> {
        self.local
            .batch_get(keys)
            .await
            .unwrap_or_else(|_| vec![None; keys.len()])
    }

    /// Batch-read, remote tier when available.
    pub async fn batch_get(&self, keys: &[String]) -> Vec<Option<i64>> {
        if let Some(remote) = self.remote() {
            match remote.batch_get(keys).await {
                Ok(values) => return values,
                Err(e) => {
                    warn!(error = %e, "remote batch read failed, serving local view");
                    self.metrics.increment_degraded_to_local();
                }
            }
        }
        self.batch_get_local(keys).await
    }

    /// Atomic init-or-increment across window pairs: remote script when
    /// available, local emulation otherwise. Remote results are written
    /// back into the local tier so subsequent pre-checks see them.
    pub async fn window_increment_batch(
        &self,
        pairs: &[WindowPair],
        now: i64,
        window_size: u64,
        increment: i64,
    ) -> Result<Vec<WindowSlot>, CounterError> {
        if let Some(remote) = self.remote() {
            match remote
                .window_increment_batch(pairs, now, window_size, increment)
                .await
            {
                Ok(slots) => {
                    self.write_back(pairs, &slots, window_size).await;
                    return Ok(slots);
                }
                Err(e) => {
                    warn!(error = %e, "window script failed, falling back to local tier");
                    self.metrics.increment_degraded_to_local();
                }
            }
        }
        self.local
            .window_increment_batch(pairs, now, window_size, increment)
            .await
    }

    async fn write_back(&self, pairs: &[WindowPair], slots: &[WindowSlot], window_size: u64) {
        let ttl = Some(Duration::from_secs(window_size));
        for (pair, slot) in pairs.iter().zip(slots) {
            if let Err(e) = self.local.set(&pair.window_key, slot.window_start, ttl).await {
                warn!(error = %e, key = %pair.window_key, "local write-back failed");
            }
            if let Err(e) = self.local.set(&pair.counter_key, slot.counter, ttl).await {
                warn!(error = %e, key = %pair.counter_key, "local write-back failed");
            }
        }
    }

    /// Apply increments to the local tier now and buffer the remote
    /// deltas for the next flush.
    pub async fn enqueue_increments(&self, ops: &[CounterOp]) {
        for op in ops {
            if let Err(e) = self.local.increment(&op.key, op.delta, op.ttl).await {
                warn!(error = %e, key = %op.key, "local increment failed");
            }
        }

        if self.remote().is_none() {
            return;
        }
        let mut pending = self.pending.lock();
        for op in ops {
            pending
                .entry(op.key.clone())
                .and_modify(|p| {
                    p.delta += op.delta;
                    // Last TTL wins.
                    if op.ttl.is_some() {
                        p.ttl = op.ttl;
                    }
                })
                .or_insert(PendingIncrement {
                    delta: op.delta,
                    ttl: op.ttl,
                });
        }
    }

    /// Apply increments to the local tier only, bypassing the buffer.
    /// Used for compensating decrements, which must be visible to this
    /// instance before the decision returns.
    pub async fn apply_local_increments(&self, ops: &[CounterOp]) {
        for op in ops {
            if let Err(e) = self.local.increment(&op.key, op.delta, op.ttl).await {
                warn!(error = %e, key = %op.key, "local increment failed");
            }
        }
    }

    /// A handle to the remote tier for fire-and-forget writes, unless
    /// disabled.
    pub fn remote_handle(&self) -> Option<Arc<dyn CounterStore>> {
        self.remote().cloned()
    }

    /// Drain the pending buffer into one remote pipeline. Called from the
    /// background flush task and explicitly at shutdown or in tests.
    pub async fn flush_pending(&self) {
        let ops: Vec<CounterOp> = {
            let mut pending = self.pending.lock();
            pending
                .drain()
                .filter(|(_, p)| p.delta != 0)
                .map(|(key, p)| CounterOp {
                    key,
                    delta: p.delta,
                    ttl: p.ttl,
                })
                .collect()
        };
        if ops.is_empty() {
            return;
        }

        let Some(remote) = self.remote() else {
            return;
        };
        match remote.increment_pipeline(&ops).await {
            Ok(()) => {
                self.metrics.add_flushed_increments(ops.len() as u64);
                debug!(count = ops.len(), "flushed buffered increments");
            }
            Err(e) => {
                // At-most-once: the deltas are dropped, not requeued.
                warn!(error = %e, count = ops.len(), "increment flush failed");
                self.metrics.increment_degraded_to_local();
            }
        }
    }

    /// Number of increments waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }
}
