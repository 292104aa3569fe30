use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CounterError;

/// The pair of keys addressing one fixed window: the window-start
/// timestamp and its counter. Both carry the same hash tag so they
/// co-locate on a single shard of a clustered backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowPair {
    pub window_key: String,
    pub counter_key: String,
}

/// Result of an init-or-increment on one window pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSlot {
    /// Start of the live window, integer epoch seconds.
    pub window_start: i64,
    /// Counter value after the increment.
    pub counter: i64,
}

/// One buffered increment, as flushed through [`CounterStore::increment_pipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterOp {
    pub key: String,
    pub delta: i64,
    pub ttl: Option<Duration>,
}

/// Trait for integer counter storage with TTL.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
/// All counter state is owned by the store; components above it are
/// stateless between requests.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Get the value for a key. Returns `None` if not found or expired.
    async fn get(&self, key: &str) -> Result<Option<i64>, CounterError>;

    /// Set a value with an optional TTL, overwriting any previous value.
    async fn set(
        &self,
        key: &str,
        value: i64,
        ttl: Option<Duration>,
    ) -> Result<(), CounterError>;

    /// Atomically increment a counter by `delta`, creating it at 0 first if
    /// absent. Returns the new value. When `ttl` is given it is applied to
    /// the key after the increment.
    async fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CounterError>;

    /// Delete a key. Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, CounterError>;

    /// Remaining TTL for a key. `None` when the key is missing or carries
    /// no expiry. Lets a cache tier adopt the authoritative tier's
    /// residual TTL instead of restarting the clock.
    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, CounterError>;

    /// Get many keys in one round-trip. Results are in input order.
    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Option<i64>>, CounterError>;

    /// Apply a batch of increments in one round-trip. Deliveries are
    /// at-most-once; counters are best-effort lower bounds on loss.
    async fn increment_pipeline(&self, ops: &[CounterOp]) -> Result<(), CounterError>;

    /// Atomic init-or-increment across a batch of window pairs.
    ///
    /// For each pair, if the window key or its counter key is absent, or
    /// `now - start` has reached `window_size`, both keys are reset
    /// (`start = now`, `counter = increment`) with TTL `window_size`;
    /// otherwise the counter is incremented. A TTL lapse of either key in
    /// the pair therefore yields a fresh window. A window start in the
    /// future (peer clock ahead of ours) counts as a live window and
    /// increments normally.
    ///
    /// The whole batch must execute atomically with respect to other
    /// writers of the same keys (a server-side script on remote
    /// backends). Results are returned in input order.
    async fn window_increment_batch(
        &self,
        pairs: &[WindowPair],
        now: i64,
        window_size: u64,
        increment: i64,
    ) -> Result<Vec<WindowSlot>, CounterError>;

    /// Apply a TTL to an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CounterError>;
}
