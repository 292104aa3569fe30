use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, warn};

use tollbooth_core::{
    CounterKind, Decision, DescriptorStatus, LimiterConfig, RequestIdentity, Usage, Verdict,
};
use tollbooth_state::{CounterOp, CounterStore};

use crate::engine::WindowEngine;
use crate::error::LimiterError;
use crate::metrics::LimiterMetrics;
use crate::planner::DescriptorPlanner;
use crate::tiered::TieredCounters;

/// The admission controller: decides ADMIT or REJECT before the
/// downstream call and reconciles counters after it.
///
/// Stateless between requests apart from the counter tiers. Holds the
/// counter store handle; the store never refers back.
pub struct RateLimiter {
    config: LimiterConfig,
    counters: Arc<TieredCounters>,
    engine: WindowEngine,
    metrics: Arc<LimiterMetrics>,
    /// Tracks fire-and-forget remote rollbacks so shutdown can drain them.
    rollback_tracker: TaskTracker,
    flush_task: Option<tokio::task::JoinHandle<()>>,
}

impl RateLimiter {
    /// Start building a limiter with the given configuration.
    #[must_use]
    pub fn builder(config: LimiterConfig) -> RateLimiterBuilder {
        RateLimiterBuilder {
            config,
            remote: None,
            metrics: None,
        }
    }

    /// Decide whether this request may proceed.
    ///
    /// Evaluates every applicable descriptor, tightest window first, one
    /// batched store operation per window size. On violation every
    /// counter this request incremented is compensated, so a rejected
    /// request does not starve the window. Store failures degrade to
    /// per-instance enforcement; they never reject or error the request.
    #[instrument(name = "limiter.decide", skip_all, fields(api_key = %identity.api_key))]
    pub async fn decide(&self, identity: &RequestIdentity, model: Option<&str>) -> Decision {
        let descriptors = DescriptorPlanner::plan(identity, model);
        if descriptors.is_empty() {
            self.metrics.increment_admitted();
            return Decision::admit(Vec::new());
        }

        let buckets = DescriptorPlanner::bucket_by_window(descriptors);
        let now = Utc::now().timestamp();

        let mut statuses: Vec<DescriptorStatus> = Vec::new();
        let mut incremented: Vec<CounterOp> = Vec::new();

        for (window, bucket) in buckets {
            let eval = match self
                .engine
                .evaluate_bucket(&bucket, window.seconds(), now)
                .await
            {
                Ok(eval) => eval,
                Err(e) => {
                    warn!(error = %e, %window, "bucket evaluation failed, proceeding best-effort");
                    continue;
                }
            };

            incremented.extend(eval.rollback_ops);
            statuses.extend(eval.statuses);

            if eval.over_limit {
                // Compensate everything incremented so far, including
                // earlier (tighter) buckets that passed.
                self.rollback(std::mem::take(&mut incremented)).await;

                let detail = statuses
                    .iter()
                    .find(|s| s.over_limit)
                    .map(DescriptorStatus::detail)
                    .unwrap_or_default();

                if self.config.lazy_rejection_enabled {
                    debug!(detail = %detail, "limit exceeded, annotating (lazy rejection)");
                    self.metrics.increment_lazy_rejected();
                    return Decision {
                        verdict: Verdict::Admit,
                        statuses,
                        retry_after_seconds: None,
                        lazy_violation: Some(detail),
                    };
                }

                debug!(detail = %detail, retry_after = ?eval.retry_after, "limit exceeded, rejecting");
                self.metrics.increment_rejected();
                return Decision {
                    verdict: Verdict::Reject,
                    statuses,
                    retry_after_seconds: eval.retry_after,
                    lazy_violation: None,
                };
            }
        }

        // Admitted: parallel counters incremented above stay held until
        // the post-call path releases them.
        for status in &statuses {
            if status.kind == CounterKind::MaxParallelRequests {
                self.metrics.increment_parallel_held();
            }
        }
        self.metrics.increment_admitted();
        Decision::admit(statuses)
    }

    /// Post-call hook for a successful downstream call: add the observed
    /// token usage to token-limited counters and release held parallel
    /// slots. Errors are logged and swallowed.
    #[instrument(name = "limiter.on_success", skip_all, fields(api_key = %identity.api_key))]
    pub async fn on_success(
        &self,
        identity: &RequestIdentity,
        model: Option<&str>,
        usage: &Usage,
    ) {
        let tokens = self.config.token_rate_limit_kind.tokens_from(usage);
        let ops = self.post_call_ops(identity, model, Some(tokens));
        if !ops.is_empty() {
            self.counters.enqueue_increments(&ops).await;
        }
    }

    /// Post-call hook for a failed downstream call: release held
    /// parallel slots only. A failed call consumed no tokens, but it did
    /// consume a slot. Cancelled requests route here too: once admitted,
    /// a request must always reach a post-call hook.
    #[instrument(name = "limiter.on_failure", skip_all, fields(api_key = %identity.api_key))]
    pub async fn on_failure(&self, identity: &RequestIdentity, model: Option<&str>) {
        let ops = self.post_call_ops(identity, model, None);
        if !ops.is_empty() {
            self.counters.enqueue_increments(&ops).await;
        }
    }

    /// Read-only view of the counters that would govern this request.
    /// Nothing is incremented.
    pub async fn peek(
        &self,
        identity: &RequestIdentity,
        model: Option<&str>,
    ) -> Vec<DescriptorStatus> {
        let descriptors = DescriptorPlanner::plan(identity, model);

        let mut keys = Vec::new();
        let mut meta = Vec::new();
        for descriptor in &descriptors {
            for (kind, limit) in descriptor.enforced_kinds() {
                keys.push(descriptor.subject.counter_key(kind));
                meta.push((descriptor, kind, limit));
            }
        }

        let values = self.counters.batch_get(&keys).await;
        meta.into_iter()
            .zip(values)
            .map(|((descriptor, kind, limit), value)| {
                let count = value.map_or(0, |v| u64::try_from(v).unwrap_or(0));
                DescriptorStatus {
                    subject: descriptor.subject.clone(),
                    window: descriptor.window,
                    kind,
                    current_limit: limit,
                    remaining: limit.saturating_sub(count),
                    over_limit: count > limit,
                }
            })
            .collect()
    }

    /// The metrics handle.
    #[must_use]
    pub fn metrics(&self) -> &LimiterMetrics {
        &self.metrics
    }

    /// Flush buffered post-call increments to the remote store now
    /// instead of waiting for the next interval tick.
    pub async fn flush_now(&self) {
        self.counters.flush_pending().await;
    }

    /// Drain buffered increments and in-flight rollbacks. Call before
    /// process exit so the shared store reflects this instance's counts.
    pub async fn shutdown(&self) {
        self.counters.flush_pending().await;
        self.rollback_tracker.close();
        self.rollback_tracker.wait().await;
    }

    /// Compensating decrements: applied to the local tier before
    /// returning, fired at the remote store without blocking the
    /// rejection. A failed remote rollback is logged; the counter
    /// self-heals at the next window reset.
    async fn rollback(&self, ops: Vec<CounterOp>) {
        if ops.is_empty() {
            return;
        }
        self.metrics.increment_rollbacks();
        self.counters.apply_local_increments(&ops).await;

        let Some(remote) = self.counters.remote_handle() else {
            return;
        };
        let metrics = Arc::clone(&self.metrics);
        self.rollback_tracker.spawn(async move {
            if let Err(e) = remote.increment_pipeline(&ops).await {
                warn!(error = %e, "overshoot rollback failed, counters self-heal at window reset");
                metrics.increment_rollback_failures();
            }
        });
    }

    /// Build the post-call adjustment ops. `tokens` is `Some` on the
    /// success path, `None` on failure.
    fn post_call_ops(
        &self,
        identity: &RequestIdentity,
        model: Option<&str>,
        tokens: Option<u64>,
    ) -> Vec<CounterOp> {
        let default_ttl = Some(self.config.default_window());
        let mut ops = Vec::new();

        for descriptor in DescriptorPlanner::plan(identity, model) {
            if let Some(tokens) = tokens
                && descriptor.limit.tokens.is_some()
                && tokens > 0
            {
                ops.push(CounterOp {
                    key: descriptor.subject.counter_key(CounterKind::Tokens),
                    delta: i64::try_from(tokens).unwrap_or(i64::MAX),
                    ttl: Some(Duration::from_secs(descriptor.window.seconds())),
                });
            }
            if descriptor.limit.max_parallel_requests.is_some() {
                ops.push(CounterOp {
                    key: descriptor
                        .subject
                        .counter_key(CounterKind::MaxParallelRequests),
                    delta: -1,
                    ttl: default_ttl,
                });
                self.metrics.increment_parallel_released();
            }
        }
        ops
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for RateLimiter {
    fn drop(&mut self) {
        if let Some(task) = self.flush_task.take() {
            task.abort();
        }
    }
}

/// Builds a [`RateLimiter`] and spawns its background flush task.
pub struct RateLimiterBuilder {
    config: LimiterConfig,
    remote: Option<Arc<dyn CounterStore>>,
    metrics: Option<Arc<LimiterMetrics>>,
}

impl RateLimiterBuilder {
    /// Attach the shared remote counter store.
    #[must_use]
    pub fn with_remote_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.remote = Some(store);
        self
    }

    /// Share a metrics struct with the surrounding gateway.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<LimiterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the limiter. Must run inside a tokio runtime: the
    /// background increment-flush task is spawned here.
    pub fn build(self) -> Result<RateLimiter, LimiterError> {
        if self.config.window_size_default == 0 {
            return Err(LimiterError::Configuration(
                "window_size_default must be greater than 0".into(),
            ));
        }

        let metrics = self.metrics.unwrap_or_default();
        let counters = Arc::new(TieredCounters::new(
            self.remote,
            self.config.local_only,
            Arc::clone(&metrics),
        ));

        let flush_counters = Arc::clone(&counters);
        let flush_interval = self.config.batch_flush_interval();
        let flush_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(flush_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                flush_counters.flush_pending().await;
            }
        });

        Ok(RateLimiter {
            config: self.config,
            engine: WindowEngine::new(Arc::clone(&counters)),
            counters,
            metrics,
            rollback_tracker: TaskTracker::new(),
            flush_task: Some(flush_task),
        })
    }
}
