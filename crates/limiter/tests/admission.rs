//! End-to-end admission scenarios driven through the public limiter API
//! against an in-process store standing in for the shared backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tollbooth_core::{
    CounterKind, LimiterConfig, QuotaMap, RateLimit, RequestIdentity, SubjectDimension,
    TokenRateLimitKind, Usage, WindowSize,
};
use tollbooth_limiter::RateLimiter;
use tollbooth_state::{CounterError, CounterOp, CounterStore, WindowPair, WindowSlot};
use tollbooth_state_memory::MemoryCounterStore;

fn limiter_with_remote(config: LimiterConfig) -> (RateLimiter, Arc<dyn CounterStore>) {
    let remote: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
    let limiter = RateLimiter::builder(config)
        .with_remote_store(Arc::clone(&remote))
        .build()
        .expect("limiter should build");
    (limiter, remote)
}

fn key_with_model_rpm(api_key: &str, model: &str, rpm: u64) -> RequestIdentity {
    let mut identity = RequestIdentity::new(api_key);
    identity.quotas = QuotaMap::new().with_model_requests(model, WindowSize::Minute, rpm);
    identity
}

#[tokio::test]
async fn single_rpm_single_instance() {
    let (limiter, remote) = limiter_with_remote(LimiterConfig::default());
    let identity = key_with_model_rpm("K", "M", 3);

    for i in 1..=3 {
        let decision = limiter.decide(&identity, Some("M")).await;
        assert!(decision.is_admitted(), "request {i} should be admitted");
    }

    let decision = limiter.decide(&identity, Some("M")).await;
    assert!(!decision.is_admitted(), "request 4 should be rejected");
    let retry = decision.retry_after_seconds.expect("retry hint on reject");
    assert!(retry <= 60, "retry-after should fit the minute window");

    let violation = decision.first_violation().expect("violated status");
    assert_eq!(violation.current_limit, 3);
    assert_eq!(violation.remaining, 0);

    // The rejection was compensated: the shared counter reads 3.
    limiter.shutdown().await;
    let counter = remote
        .get("{model_per_key:K:M:rpm}:requests")
        .await
        .unwrap();
    assert_eq!(counter, Some(3));
}

#[tokio::test]
async fn overshoot_rollback_under_contention() {
    let (limiter, remote) = limiter_with_remote(LimiterConfig::default());
    let limiter = Arc::new(limiter);
    let identity = key_with_model_rpm("K", "M", 1);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let limiter = Arc::clone(&limiter);
        let identity = identity.clone();
        handles.push(tokio::spawn(async move {
            limiter.decide(&identity, Some("M")).await.is_admitted()
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1, "exactly one of five should win the slot");

    limiter.shutdown().await;
    let counter = remote
        .get("{model_per_key:K:M:rpm}:requests")
        .await
        .unwrap();
    assert_eq!(counter, Some(1), "every rejection must be compensated");
}

#[tokio::test]
async fn multi_window_conjunction_reports_tightest_violated_window() {
    let (limiter, remote) = limiter_with_remote(LimiterConfig::default());
    let mut identity = RequestIdentity::new("sk-multi");
    identity.quotas = QuotaMap::new()
        .with_limit(
            SubjectDimension::ApiKey,
            WindowSize::Minute,
            RateLimit::requests(10),
        )
        .with_limit(
            SubjectDimension::ApiKey,
            WindowSize::Day,
            RateLimit::requests(5),
        );

    for i in 1..=5 {
        let decision = limiter.decide(&identity, None).await;
        assert!(decision.is_admitted(), "request {i} should be admitted");
    }

    let decision = limiter.decide(&identity, None).await;
    assert!(!decision.is_admitted(), "request 6 breaches the day window");

    // The violated window is the day, so the hint points at the day
    // reset, not the minute reset.
    let retry = decision.retry_after_seconds.expect("retry hint");
    assert!(retry > 60, "retry must point at the day window, got {retry}");
    assert!(retry <= 86_400);

    let violation = decision.first_violation().expect("violated status");
    assert_eq!(violation.window, WindowSize::Day);

    // Both counters were compensated for the rejected request.
    limiter.shutdown().await;
    let minute = remote.get("{api_key:sk-multi:rpm}:requests").await.unwrap();
    let day = remote.get("{api_key:sk-multi:rpd}:requests").await.unwrap();
    assert_eq!(minute, Some(5));
    assert_eq!(day, Some(5));
}

#[tokio::test]
async fn parallel_slot_released_on_success() {
    let (limiter, _remote) = limiter_with_remote(LimiterConfig::default());
    let mut identity = RequestIdentity::new("sk-par");
    identity.quotas = QuotaMap::new().with_limit(
        SubjectDimension::ApiKey,
        WindowSize::Minute,
        RateLimit {
            max_parallel_requests: Some(1),
            ..RateLimit::default()
        },
    );

    // A is admitted and holds the slot.
    let a = limiter.decide(&identity, None).await;
    assert!(a.is_admitted());

    // B arrives while A is in flight.
    let b = limiter.decide(&identity, None).await;
    assert!(!b.is_admitted(), "no slot left while A is in flight");

    // A completes; the slot is released. Drain B's in-flight rollback
    // and the buffered release so the shared view is settled.
    limiter.on_success(&identity, None, &Usage::total(10)).await;
    limiter.shutdown().await;

    let c = limiter.decide(&identity, None).await;
    assert!(c.is_admitted(), "C should take the released slot");

    let snapshot = limiter.metrics().snapshot();
    assert_eq!(snapshot.parallel_held, 2);
    assert_eq!(snapshot.parallel_released, 1);
}

#[tokio::test]
async fn parallel_slot_released_on_failure() {
    let (limiter, _remote) = limiter_with_remote(LimiterConfig::default());
    let mut identity = RequestIdentity::new("sk-parf");
    identity.quotas = QuotaMap::new().with_limit(
        SubjectDimension::ApiKey,
        WindowSize::Minute,
        RateLimit {
            requests: Some(10),
            max_parallel_requests: Some(1),
            ..RateLimit::default()
        },
    );

    assert!(limiter.decide(&identity, None).await.is_admitted());
    assert!(!limiter.decide(&identity, None).await.is_admitted());

    // The downstream call failed (or was cancelled): the slot must still
    // be released, token counters untouched.
    limiter.on_failure(&identity, None).await;
    limiter.shutdown().await;

    assert!(limiter.decide(&identity, None).await.is_admitted());

    // The requests counter kept counting across all three attempts: two
    // admits plus one compensated rejection.
    let statuses = limiter.peek(&identity, None).await;
    let requests = statuses
        .iter()
        .find(|s| s.kind == CounterKind::Requests)
        .unwrap();
    assert_eq!(requests.remaining, 8);
}

/// A remote store that is down: every operation errors.
struct FailingStore;

#[async_trait]
impl CounterStore for FailingStore {
    async fn get(&self, _key: &str) -> Result<Option<i64>, CounterError> {
        Err(CounterError::Connection("store is down".into()))
    }
    async fn set(
        &self,
        _key: &str,
        _value: i64,
        _ttl: Option<Duration>,
    ) -> Result<(), CounterError> {
        Err(CounterError::Connection("store is down".into()))
    }
    async fn increment(
        &self,
        _key: &str,
        _delta: i64,
        _ttl: Option<Duration>,
    ) -> Result<i64, CounterError> {
        Err(CounterError::Connection("store is down".into()))
    }
    async fn delete(&self, _key: &str) -> Result<bool, CounterError> {
        Err(CounterError::Connection("store is down".into()))
    }
    async fn remaining_ttl(&self, _key: &str) -> Result<Option<Duration>, CounterError> {
        Err(CounterError::Connection("store is down".into()))
    }
    async fn batch_get(&self, _keys: &[String]) -> Result<Vec<Option<i64>>, CounterError> {
        Err(CounterError::Connection("store is down".into()))
    }
    async fn increment_pipeline(&self, _ops: &[CounterOp]) -> Result<(), CounterError> {
        Err(CounterError::Connection("store is down".into()))
    }
    async fn window_increment_batch(
        &self,
        _pairs: &[WindowPair],
        _now: i64,
        _window_size: u64,
        _increment: i64,
    ) -> Result<Vec<WindowSlot>, CounterError> {
        Err(CounterError::Connection("store is down".into()))
    }
    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), CounterError> {
        Err(CounterError::Connection("store is down".into()))
    }
}

#[tokio::test]
async fn degraded_mode_enforces_per_instance() {
    let limiter = RateLimiter::builder(LimiterConfig::default())
        .with_remote_store(Arc::new(FailingStore))
        .build()
        .unwrap();

    let identity = key_with_model_rpm("K", "M", 2);

    // The dead store never rejects and never gives a free pass: local
    // counters keep enforcing the configured limit.
    assert!(limiter.decide(&identity, Some("M")).await.is_admitted());
    assert!(limiter.decide(&identity, Some("M")).await.is_admitted());
    assert!(!limiter.decide(&identity, Some("M")).await.is_admitted());

    assert!(
        limiter.metrics().snapshot().degraded_to_local > 0,
        "degradation must be visible in telemetry"
    );
}

#[tokio::test]
async fn lazy_rejection_annotates_and_rolls_back() {
    let config = LimiterConfig {
        lazy_rejection_enabled: true,
        ..LimiterConfig::default()
    };
    let (limiter, remote) = limiter_with_remote(config);
    let identity = key_with_model_rpm("K", "M", 1);

    let first = limiter.decide(&identity, Some("M")).await;
    assert!(first.is_admitted());
    assert!(first.lazy_violation.is_none());

    let second = limiter.decide(&identity, Some("M")).await;
    assert!(second.is_admitted(), "lazy mode never hard-rejects");
    let detail = second.lazy_violation.expect("violation annotation");
    assert!(detail.contains("Rate limit exceeded for model_per_key"));

    // The lazy-rejected request still rolled its increment back.
    limiter.shutdown().await;
    let counter = remote
        .get("{model_per_key:K:M:rpm}:requests")
        .await
        .unwrap();
    assert_eq!(counter, Some(1));
    assert_eq!(limiter.metrics().snapshot().lazy_rejected, 1);
}

#[tokio::test]
async fn success_adds_token_usage() {
    let (limiter, remote) = limiter_with_remote(LimiterConfig::default());
    let mut identity = RequestIdentity::new("sk-tok");
    identity.quotas = QuotaMap::new().with_limit(
        SubjectDimension::ApiKey,
        WindowSize::Minute,
        RateLimit {
            tokens: Some(100),
            ..RateLimit::default()
        },
    );

    assert!(limiter.decide(&identity, None).await.is_admitted());

    limiter
        .on_success(
            &identity,
            None,
            &Usage {
                prompt_tokens: 15,
                completion_tokens: 25,
                total_tokens: 40,
            },
        )
        .await;
    limiter.flush_now().await;

    // 1 from admission plus the 40 observed tokens.
    let counter = remote.get("{api_key:sk-tok:rpm}:tokens").await.unwrap();
    assert_eq!(counter, Some(41));
}

#[tokio::test]
async fn token_accounting_kind_is_configurable() {
    let config = LimiterConfig {
        token_rate_limit_kind: TokenRateLimitKind::Output,
        ..LimiterConfig::default()
    };
    let (limiter, remote) = limiter_with_remote(config);
    let mut identity = RequestIdentity::new("sk-out");
    identity.quotas = QuotaMap::new().with_limit(
        SubjectDimension::ApiKey,
        WindowSize::Minute,
        RateLimit {
            tokens: Some(100),
            ..RateLimit::default()
        },
    );

    assert!(limiter.decide(&identity, None).await.is_admitted());
    limiter
        .on_success(
            &identity,
            None,
            &Usage {
                prompt_tokens: 15,
                completion_tokens: 25,
                total_tokens: 40,
            },
        )
        .await;
    limiter.flush_now().await;

    let counter = remote.get("{api_key:sk-out:rpm}:tokens").await.unwrap();
    assert_eq!(counter, Some(26), "output mode counts completion tokens");
}

#[tokio::test]
async fn failure_does_not_touch_token_counters() {
    let (limiter, remote) = limiter_with_remote(LimiterConfig::default());
    let mut identity = RequestIdentity::new("sk-fail");
    identity.quotas = QuotaMap::new().with_limit(
        SubjectDimension::ApiKey,
        WindowSize::Minute,
        RateLimit {
            tokens: Some(100),
            max_parallel_requests: Some(4),
            ..RateLimit::default()
        },
    );

    assert!(limiter.decide(&identity, None).await.is_admitted());
    limiter.on_failure(&identity, None).await;
    limiter.flush_now().await;

    let tokens = remote.get("{api_key:sk-fail:rpm}:tokens").await.unwrap();
    let parallel = remote
        .get("{api_key:sk-fail:rpm}:max_parallel_requests")
        .await
        .unwrap();
    assert_eq!(tokens, Some(1), "only the admission increment remains");
    assert_eq!(parallel, Some(0), "the held slot was released");
}

#[tokio::test]
async fn peek_reads_without_counting() {
    let (limiter, _remote) = limiter_with_remote(LimiterConfig::default());
    let identity = key_with_model_rpm("K", "M", 3);

    assert!(limiter.decide(&identity, Some("M")).await.is_admitted());

    let before = limiter.peek(&identity, Some("M")).await;
    let after = limiter.peek(&identity, Some("M")).await;
    assert_eq!(before, after, "peek must not consume capacity");
    assert_eq!(before.len(), 1);
    assert_eq!(before[0].remaining, 2);
    assert!(!before[0].over_limit);
}

#[tokio::test]
async fn statuses_cover_every_enforced_counter() {
    let (limiter, _remote) = limiter_with_remote(LimiterConfig::default());
    let mut identity = RequestIdentity::new("sk-all");
    identity.user_id = Some("u-1".into());
    identity.quotas = QuotaMap::new()
        .with_limit(
            SubjectDimension::ApiKey,
            WindowSize::Minute,
            RateLimit {
                requests: Some(10),
                tokens: Some(1_000),
                max_parallel_requests: Some(2),
            },
        )
        .with_limit(
            SubjectDimension::User,
            WindowSize::Hour,
            RateLimit::requests(100),
        );

    let decision = limiter.decide(&identity, None).await;
    assert!(decision.is_admitted());
    assert_eq!(
        decision.statuses.len(),
        4,
        "requests + tokens + parallel for the key, requests for the user"
    );
    assert!(decision.statuses.iter().all(|s| !s.over_limit));
}
