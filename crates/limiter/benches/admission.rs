use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use tollbooth_core::{
    LimiterConfig, QuotaMap, RateLimit, RequestIdentity, SubjectDimension, WindowSize,
};
use tollbooth_limiter::RateLimiter;
use tollbooth_state::CounterStore;
use tollbooth_state_memory::MemoryCounterStore;

fn bench_identity() -> RequestIdentity {
    let mut identity = RequestIdentity::new("sk-bench");
    identity.user_id = Some("u-bench".into());
    identity.quotas = QuotaMap::new()
        .with_limit(
            SubjectDimension::ApiKey,
            WindowSize::Minute,
            RateLimit {
                requests: Some(1_000_000),
                tokens: Some(1_000_000_000),
                max_parallel_requests: Some(10_000),
            },
        )
        .with_limit(
            SubjectDimension::User,
            WindowSize::Day,
            RateLimit::requests(1_000_000),
        )
        .with_model_requests("gpt-4", WindowSize::Minute, 1_000_000);
    identity
}

fn bench_decide_local_only(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    let config = LimiterConfig {
        local_only: true,
        ..LimiterConfig::default()
    };
    let limiter = rt
        .block_on(async { RateLimiter::builder(config).build() })
        .expect("limiter should build");
    let identity = bench_identity();

    c.bench_function("decide_local_only", |b| {
        b.iter(|| {
            rt.block_on(async {
                let decision = limiter.decide(black_box(&identity), Some("gpt-4")).await;
                black_box(decision)
            })
        });
    });
}

fn bench_decide_with_in_process_remote(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    let remote: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
    let limiter = rt
        .block_on(async {
            RateLimiter::builder(LimiterConfig::default())
                .with_remote_store(remote)
                .build()
        })
        .expect("limiter should build");
    let identity = bench_identity();

    c.bench_function("decide_in_process_remote", |b| {
        b.iter(|| {
            rt.block_on(async {
                let decision = limiter.decide(black_box(&identity), Some("gpt-4")).await;
                black_box(decision)
            })
        });
    });
}

criterion_group!(
    benches,
    bench_decide_local_only,
    bench_decide_with_in_process_remote,
);
criterion_main!(benches);
