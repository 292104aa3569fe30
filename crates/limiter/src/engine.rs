use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use tollbooth_core::{CounterKind, Descriptor, DescriptorStatus};
use tollbooth_state::{CounterError, CounterOp, WindowPair};

use crate::tiered::TieredCounters;

/// One counter to be driven through the window mechanism.
struct EnforcedCounter {
    pair: WindowPair,
    kind: CounterKind,
    limit: u64,
    descriptor_index: usize,
}

/// Result of evaluating one window-size bucket of descriptors.
#[derive(Debug, Default)]
pub struct BucketEvaluation {
    /// Status per enforced counter, in descriptor order.
    pub statuses: Vec<DescriptorStatus>,
    /// Compensating decrements for every counter this bucket incremented.
    /// Empty when the cached pre-check rejected before any write.
    pub rollback_ops: Vec<CounterOp>,
    /// Whether any counter exceeded its limit.
    pub over_limit: bool,
    /// Seconds until the tightest violated window in this bucket resets.
    pub retry_after: Option<u64>,
}

/// Executes the fixed-window init-or-increment for a bucket of
/// descriptors sharing one window size.
///
/// The local tier is consulted first: when the cached view already shows
/// a counter over its limit, the bucket rejects without spending a write
/// on the shared store. Otherwise all pairs go through one compound
/// store operation, a single suspension per bucket.
pub struct WindowEngine {
    counters: Arc<TieredCounters>,
}

impl WindowEngine {
    pub fn new(counters: Arc<TieredCounters>) -> Self {
        Self { counters }
    }

    /// Evaluate one bucket. `now` is integer epoch seconds, captured once
    /// per request so every bucket agrees on the clock.
    pub async fn evaluate_bucket(
        &self,
        bucket: &[Descriptor],
        window_size: u64,
        now: i64,
    ) -> Result<BucketEvaluation, CounterError> {
        let enforced = Self::enforced_counters(bucket);
        if enforced.is_empty() {
            return Ok(BucketEvaluation::default());
        }

        // Pre-check against the cached view: a counter already over its
        // limit rejects without incrementing anything anywhere.
        if let Some(eval) = self.precheck(bucket, &enforced, window_size, now).await {
            debug!(window_size, "bucket rejected from cached counters");
            return Ok(eval);
        }

        let pairs: Vec<WindowPair> = enforced.iter().map(|e| e.pair.clone()).collect();
        let slots = self
            .counters
            .window_increment_batch(&pairs, now, window_size, 1)
            .await?;

        let ttl = Some(Duration::from_secs(window_size));
        let mut eval = BucketEvaluation::default();
        for (counter, slot) in enforced.iter().zip(&slots) {
            let count = u64::try_from(slot.counter).unwrap_or(0);
            let over = count > counter.limit;
            let descriptor = &bucket[counter.descriptor_index];

            eval.rollback_ops.push(CounterOp {
                key: counter.pair.counter_key.clone(),
                delta: -1,
                ttl,
            });
            eval.statuses.push(DescriptorStatus {
                subject: descriptor.subject.clone(),
                window: descriptor.window,
                kind: counter.kind,
                current_limit: counter.limit,
                remaining: counter.limit.saturating_sub(count),
                over_limit: over,
            });

            if over {
                eval.over_limit = true;
                let retry = retry_after(now, slot.window_start, window_size);
                eval.retry_after = Some(eval.retry_after.map_or(retry, |r| r.min(retry)));
            }
        }
        Ok(eval)
    }

    fn enforced_counters(bucket: &[Descriptor]) -> Vec<EnforcedCounter> {
        let mut enforced = Vec::new();
        for (descriptor_index, descriptor) in bucket.iter().enumerate() {
            let window_key = descriptor.subject.window_key();
            for (kind, limit) in descriptor.enforced_kinds() {
                enforced.push(EnforcedCounter {
                    pair: WindowPair {
                        window_key: window_key.clone(),
                        counter_key: descriptor.subject.counter_key(kind),
                    },
                    kind,
                    limit,
                    descriptor_index,
                });
            }
        }
        enforced
    }

    /// Returns a rejection built from cached values when the local tier
    /// already proves a counter over its limit, `None` otherwise.
    async fn precheck(
        &self,
        bucket: &[Descriptor],
        enforced: &[EnforcedCounter],
        window_size: u64,
        now: i64,
    ) -> Option<BucketEvaluation> {
        let mut keys = Vec::with_capacity(enforced.len() * 2);
        for counter in enforced {
            keys.push(counter.pair.window_key.clone());
            keys.push(counter.pair.counter_key.clone());
        }
        let cached = self.counters.batch_get_local(&keys).await;

        let over_any = enforced.iter().enumerate().any(|(i, counter)| {
            cached[i * 2 + 1].is_some_and(|v| u64::try_from(v).unwrap_or(0) > counter.limit)
        });
        if !over_any {
            return None;
        }

        let mut eval = BucketEvaluation {
            over_limit: true,
            ..BucketEvaluation::default()
        };
        for (i, counter) in enforced.iter().enumerate() {
            let window_start = cached[i * 2];
            let count = cached[i * 2 + 1].map_or(0, |v| u64::try_from(v).unwrap_or(0));
            let over = count > counter.limit;
            let descriptor = &bucket[counter.descriptor_index];

            eval.statuses.push(DescriptorStatus {
                subject: descriptor.subject.clone(),
                window: descriptor.window,
                kind: counter.kind,
                current_limit: counter.limit,
                remaining: counter.limit.saturating_sub(count),
                over_limit: over,
            });
            if over {
                let retry = window_start
                    .map_or(window_size, |start| retry_after(now, start, window_size));
                eval.retry_after = Some(eval.retry_after.map_or(retry, |r| r.min(retry)));
            }
        }
        Some(eval)
    }
}

/// Seconds until a violated window resets, clamped to `1..=window_size`.
fn retry_after(now: i64, window_start: i64, window_size: u64) -> u64 {
    let elapsed = now.saturating_sub(window_start).max(0);
    let elapsed = u64::try_from(elapsed).unwrap_or(0);
    window_size.saturating_sub(elapsed).clamp(1, window_size)
}
