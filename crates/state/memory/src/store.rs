use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use tollbooth_state::error::CounterError;
use tollbooth_state::store::{CounterOp, CounterStore, WindowPair, WindowSlot};

/// A single counter in the in-memory store.
#[derive(Debug, Clone, Copy)]
struct Entry {
    value: i64,
    expires_at: Option<Instant>,
}

impl Entry {
    /// Returns `true` if this entry has passed its TTL deadline.
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Compute the expiry instant from an optional TTL duration.
fn expiry_from_ttl(ttl: Option<Duration>) -> Option<Instant> {
    ttl.map(|d| Instant::now() + d)
}

/// In-memory [`CounterStore`] backed by a [`DashMap`].
///
/// Entries are lazily evicted on read when their TTL has elapsed. Used as
/// the process-local cache tier and as the sole tier when the remote
/// store is unreachable; in that mode limits are per-instance rather than
/// global.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    data: DashMap<String, Entry>,
    /// Serializes compound window operations, which touch two keys per
    /// pair. Plain single-key operations stay lock-free on the map.
    window_lock: Mutex<()>,
}

impl MemoryCounterStore {
    /// Create a new, empty in-memory counter store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read_live(&self, key: &str) -> Option<i64> {
        if let Some(entry) = self.data.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.data.remove(key);
                return None;
            }
            return Some(entry.value);
        }
        None
    }

    fn write(&self, key: &str, value: i64, expires_at: Option<Instant>) {
        self.data.insert(key.to_owned(), Entry { value, expires_at });
    }

    fn apply_increment(&self, key: &str, delta: i64, ttl: Option<Duration>) -> i64 {
        let expires_at = expiry_from_ttl(ttl);

        // Remove any expired entry first so the counter starts fresh.
        self.data.remove_if(key, |_, entry| entry.is_expired());

        let mut ref_mut = self.data.entry(key.to_owned()).or_insert(Entry {
            value: 0,
            expires_at,
        });
        ref_mut.value += delta;
        if let Some(deadline) = expires_at {
            ref_mut.expires_at = Some(deadline);
        }
        ref_mut.value
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, CounterError> {
        Ok(self.read_live(key))
    }

    async fn set(
        &self,
        key: &str,
        value: i64,
        ttl: Option<Duration>,
    ) -> Result<(), CounterError> {
        self.write(key, value, expiry_from_ttl(ttl));
        Ok(())
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CounterError> {
        Ok(self.apply_increment(key, delta, ttl))
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, CounterError> {
        match self.data.get(key) {
            Some(entry) if !entry.is_expired() => Ok(entry
                .expires_at
                .map(|deadline| deadline.saturating_duration_since(Instant::now()))),
            _ => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, CounterError> {
        // Treat expired entries as "not found".
        match self.data.remove(key) {
            Some((_, entry)) => Ok(!entry.is_expired()),
            None => Ok(false),
        }
    }

    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Option<i64>>, CounterError> {
        Ok(keys.iter().map(|k| self.read_live(k)).collect())
    }

    async fn increment_pipeline(&self, ops: &[CounterOp]) -> Result<(), CounterError> {
        for op in ops {
            self.apply_increment(&op.key, op.delta, op.ttl);
        }
        Ok(())
    }

    async fn window_increment_batch(
        &self,
        pairs: &[WindowPair],
        now: i64,
        window_size: u64,
        increment: i64,
    ) -> Result<Vec<WindowSlot>, CounterError> {
        let _guard = self
            .window_lock
            .lock()
            .map_err(|_| CounterError::Backend("window lock poisoned".into()))?;

        let ttl = Some(Duration::from_secs(window_size));
        let window_elapsed =
            |start: i64| now.saturating_sub(start) >= i64::try_from(window_size).unwrap_or(i64::MAX);

        let mut slots = Vec::with_capacity(pairs.len());
        for pair in pairs {
            let window_start = self.read_live(&pair.window_key);
            let counter = self.read_live(&pair.counter_key);

            match (window_start, counter) {
                (Some(start), Some(_)) if !window_elapsed(start) => {
                    // TTL untouched: the counter keeps the window's deadline.
                    let counter = self.apply_increment(&pair.counter_key, increment, None);
                    slots.push(WindowSlot {
                        window_start: start,
                        counter,
                    });
                }
                // Absent, elapsed, or a lapsed half of the pair: fresh window.
                _ => {
                    let expires_at = expiry_from_ttl(ttl);
                    self.write(&pair.window_key, now, expires_at);
                    self.write(&pair.counter_key, increment, expires_at);
                    slots.push(WindowSlot {
                        window_start: now,
                        counter: increment,
                    });
                }
            }
        }
        Ok(slots)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CounterError> {
        if let Some(mut entry) = self.data.get_mut(key) {
            entry.expires_at = Some(Instant::now() + ttl);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollbooth_state::testing::run_counter_conformance_tests;

    #[tokio::test]
    async fn conformance() {
        let store = MemoryCounterStore::new();
        run_counter_conformance_tests(&store)
            .await
            .expect("conformance tests should pass");
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_via_get() {
        let store = MemoryCounterStore::new();
        store
            .set("ttl-expire", 9, Some(Duration::from_secs(5)))
            .await
            .unwrap();

        assert_eq!(store.get("ttl-expire").await.unwrap(), Some(9));

        tokio::time::advance(Duration::from_secs(6)).await;

        // Lazy eviction: get should return None.
        assert_eq!(store.get("ttl-expire").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_increment_resets_after_expiry() {
        let store = MemoryCounterStore::new();
        store
            .increment("ttl-counter", 10, Some(Duration::from_secs(2)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;

        // After expiry the counter should restart from zero.
        let val = store.increment("ttl-counter", 1, None).await.unwrap();
        assert_eq!(val, 1, "counter should reset after TTL expiry");
    }

    #[tokio::test(start_paused = true)]
    async fn window_keys_expire_together() {
        let store = MemoryCounterStore::new();
        let pairs = vec![WindowPair {
            window_key: "{k:v}:window".into(),
            counter_key: "{k:v}:requests".into(),
        }];
        store
            .window_increment_batch(&pairs, 100, 60, 1)
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(61)).await;

        assert_eq!(store.get("{k:v}:window").await.unwrap(), None);
        assert_eq!(store.get("{k:v}:requests").await.unwrap(), None);
    }

    #[tokio::test]
    async fn in_window_increment_keeps_ttl() {
        let store = MemoryCounterStore::new();
        let pairs = vec![WindowPair {
            window_key: "{t:v}:window".into(),
            counter_key: "{t:v}:requests".into(),
        }];
        store
            .window_increment_batch(&pairs, 100, 60, 1)
            .await
            .unwrap();
        let slots = store
            .window_increment_batch(&pairs, 110, 60, 1)
            .await
            .unwrap();
        assert_eq!(slots[0].counter, 2);
        assert_eq!(slots[0].window_start, 100);
    }
}
