use std::time::Duration;

use crate::error::CounterError;
use crate::store::{CounterOp, CounterStore, WindowPair, WindowSlot};

fn pair(tag: &str) -> WindowPair {
    WindowPair {
        window_key: format!("{{test:{tag}}}:window"),
        counter_key: format!("{{test:{tag}}}:requests"),
    }
}

/// Run the full counter store conformance test suite.
///
/// Call this from your backend's test module with a fresh store instance.
///
/// # Errors
///
/// Returns an error if any conformance test fails.
pub async fn run_counter_conformance_tests(store: &dyn CounterStore) -> Result<(), CounterError> {
    test_get_missing(store).await?;
    test_set_and_get(store).await?;
    test_increment(store).await?;
    test_remaining_ttl(store).await?;
    test_delete(store).await?;
    test_batch_get_ordering(store).await?;
    test_increment_pipeline(store).await?;
    test_window_init(store).await?;
    test_window_in_window_increment(store).await?;
    test_window_reset_after_elapsed(store).await?;
    test_window_future_start_increments(store).await?;
    test_window_counter_lapse_resets(store).await?;
    Ok(())
}

async fn test_get_missing(store: &dyn CounterStore) -> Result<(), CounterError> {
    let val = store.get("conformance:missing").await?;
    assert!(val.is_none(), "get on missing key should return None");
    Ok(())
}

async fn test_set_and_get(store: &dyn CounterStore) -> Result<(), CounterError> {
    store.set("conformance:set-get", 42, None).await?;
    let val = store.get("conformance:set-get").await?;
    assert_eq!(val, Some(42));
    Ok(())
}

async fn test_increment(store: &dyn CounterStore) -> Result<(), CounterError> {
    let val = store.increment("conformance:counter", 1, None).await?;
    assert_eq!(val, 1, "first increment from zero should yield 1");

    let val = store.increment("conformance:counter", 5, None).await?;
    assert_eq!(val, 6, "second increment should accumulate");

    let val = store.increment("conformance:counter", -2, None).await?;
    assert_eq!(val, 4, "negative delta should decrement");
    Ok(())
}

async fn test_remaining_ttl(store: &dyn CounterStore) -> Result<(), CounterError> {
    store
        .set("conformance:ttl-read", 1, Some(Duration::from_secs(300)))
        .await?;
    let ttl = store.remaining_ttl("conformance:ttl-read").await?;
    let ttl = ttl.expect("key with expiry should report a TTL");
    assert!(
        ttl <= Duration::from_secs(300) && ttl > Duration::from_secs(290),
        "residual TTL should be close to the configured TTL, got {ttl:?}"
    );

    store.set("conformance:ttl-none", 1, None).await?;
    assert!(store.remaining_ttl("conformance:ttl-none").await?.is_none());
    assert!(store.remaining_ttl("conformance:ttl-missing").await?.is_none());
    Ok(())
}

async fn test_delete(store: &dyn CounterStore) -> Result<(), CounterError> {
    store.set("conformance:to-delete", 7, None).await?;
    let existed = store.delete("conformance:to-delete").await?;
    assert!(existed, "delete should return true for existing key");
    let val = store.get("conformance:to-delete").await?;
    assert!(val.is_none(), "get after delete should return None");

    let existed = store.delete("conformance:to-delete").await?;
    assert!(!existed, "delete on missing key should return false");
    Ok(())
}

async fn test_batch_get_ordering(store: &dyn CounterStore) -> Result<(), CounterError> {
    store.set("conformance:batch-a", 1, None).await?;
    store.set("conformance:batch-c", 3, None).await?;

    let vals = store
        .batch_get(&[
            "conformance:batch-a".into(),
            "conformance:batch-b".into(),
            "conformance:batch-c".into(),
        ])
        .await?;
    assert_eq!(
        vals,
        vec![Some(1), None, Some(3)],
        "batch_get must preserve input order and report misses"
    );
    Ok(())
}

async fn test_increment_pipeline(store: &dyn CounterStore) -> Result<(), CounterError> {
    let ops = vec![
        CounterOp {
            key: "conformance:pipe-a".into(),
            delta: 3,
            ttl: Some(Duration::from_secs(600)),
        },
        CounterOp {
            key: "conformance:pipe-b".into(),
            delta: -1,
            ttl: None,
        },
    ];
    store.increment_pipeline(&ops).await?;

    assert_eq!(store.get("conformance:pipe-a").await?, Some(3));
    assert_eq!(store.get("conformance:pipe-b").await?, Some(-1));
    Ok(())
}

async fn test_window_init(store: &dyn CounterStore) -> Result<(), CounterError> {
    let pairs = vec![pair("init")];
    let slots = store.window_increment_batch(&pairs, 1_000, 60, 1).await?;
    assert_eq!(
        slots,
        vec![WindowSlot {
            window_start: 1_000,
            counter: 1
        }],
        "fresh window should start at now with counter = increment"
    );
    Ok(())
}

async fn test_window_in_window_increment(store: &dyn CounterStore) -> Result<(), CounterError> {
    let pairs = vec![pair("in-window")];
    store.window_increment_batch(&pairs, 2_000, 60, 1).await?;
    let slots = store.window_increment_batch(&pairs, 2_030, 60, 1).await?;
    assert_eq!(
        slots,
        vec![WindowSlot {
            window_start: 2_000,
            counter: 2
        }],
        "in-window call should keep the start and bump the counter"
    );
    Ok(())
}

async fn test_window_reset_after_elapsed(store: &dyn CounterStore) -> Result<(), CounterError> {
    let pairs = vec![pair("reset")];
    store.window_increment_batch(&pairs, 3_000, 60, 1).await?;
    store.window_increment_batch(&pairs, 3_010, 60, 1).await?;

    // now == start + window_size is already outside the window.
    let slots = store.window_increment_batch(&pairs, 3_060, 60, 1).await?;
    assert_eq!(
        slots,
        vec![WindowSlot {
            window_start: 3_060,
            counter: 1
        }],
        "an elapsed window must reset"
    );
    Ok(())
}

async fn test_window_future_start_increments(store: &dyn CounterStore) -> Result<(), CounterError> {
    let pairs = vec![pair("skew")];
    // A peer with a clock ahead of ours initialized the window.
    store.window_increment_batch(&pairs, 5_000, 60, 1).await?;

    // Our clock reads earlier than the recorded start: still a live window.
    let slots = store.window_increment_batch(&pairs, 4_995, 60, 1).await?;
    assert_eq!(
        slots,
        vec![WindowSlot {
            window_start: 5_000,
            counter: 2
        }],
        "a future window start must increment, not reset"
    );
    Ok(())
}

async fn test_window_counter_lapse_resets(store: &dyn CounterStore) -> Result<(), CounterError> {
    let p = pair("lapse");
    let pairs = std::slice::from_ref(&p);
    store.window_increment_batch(pairs, 6_000, 60, 1).await?;
    store.window_increment_batch(pairs, 6_001, 60, 1).await?;

    // Counter key lapses while the window key survives: full reset.
    store.delete(&p.counter_key).await?;
    let slots = store.window_increment_batch(pairs, 6_010, 60, 1).await?;
    assert_eq!(
        slots,
        vec![WindowSlot {
            window_start: 6_010,
            counter: 1
        }],
        "a lapsed counter key must yield a fresh window"
    );

    // And the other way around: window key lapses, counter survives.
    store.delete(&p.window_key).await?;
    let slots = store.window_increment_batch(pairs, 6_020, 60, 1).await?;
    assert_eq!(
        slots,
        vec![WindowSlot {
            window_start: 6_020,
            counter: 1
        }],
        "a lapsed window key must yield a fresh window"
    );
    Ok(())
}
