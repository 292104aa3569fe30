use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::{AsyncCommands, Script};

use tollbooth_state::error::CounterError;
use tollbooth_state::store::{CounterOp, CounterStore, WindowPair, WindowSlot};

use crate::config::RedisConfig;
use crate::scripts;

/// Redis-backed implementation of [`CounterStore`].
///
/// Uses a `deadpool-redis` connection pool. The compound window
/// operation runs as a Lua script so the read-reset-or-increment on each
/// key pair is atomic with respect to other gateway instances.
pub struct RedisCounterStore {
    pool: Pool,
    prefix: String,
    window_script: Script,
}

impl RedisCounterStore {
    /// Create a new `RedisCounterStore` from the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::Connection`] if the pool cannot be created.
    pub fn new(config: &RedisConfig) -> Result<Self, CounterError> {
        let cfg = Config::from_url(config.effective_url());
        let pool = cfg
            .builder()
            .map(|b| {
                b.max_size(config.pool_size)
                    .wait_timeout(Some(config.connection_timeout))
                    .runtime(Runtime::Tokio1)
                    .build()
            })
            .map_err(|e| CounterError::Connection(e.to_string()))?
            .map_err(|e| CounterError::Connection(e.to_string()))?;

        Ok(Self {
            pool,
            prefix: config.prefix.clone(),
            window_script: Script::new(scripts::BATCH_WINDOW_SCRIPT),
        })
    }

    /// Prepend the configured prefix. The hash tag stays inside the key,
    /// so a pair's keys still land on one shard.
    fn prefixed(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    /// Obtain a connection from the pool.
    async fn conn(&self) -> Result<deadpool_redis::Connection, CounterError> {
        self.pool
            .get()
            .await
            .map_err(|e| CounterError::Connection(e.to_string()))
    }
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX).max(1)
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<i64>, CounterError> {
        let mut conn = self.conn().await?;
        conn.get(self.prefixed(key))
            .await
            .map_err(|e| CounterError::Backend(e.to_string()))
    }

    async fn set(
        &self,
        key: &str,
        value: i64,
        ttl: Option<Duration>,
    ) -> Result<(), CounterError> {
        let key = self.prefixed(key);
        let mut conn = self.conn().await?;
        match ttl {
            Some(d) => conn
                .set_ex::<_, _, ()>(key, value, u64::try_from(ttl_secs(d)).unwrap_or(u64::MAX))
                .await
                .map_err(|e| CounterError::Backend(e.to_string())),
            None => conn
                .set::<_, _, ()>(key, value)
                .await
                .map_err(|e| CounterError::Backend(e.to_string())),
        }
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<i64, CounterError> {
        let key = self.prefixed(key);
        let mut conn = self.conn().await?;

        let new_val: i64 = conn
            .incr(&key, delta)
            .await
            .map_err(|e| CounterError::Backend(e.to_string()))?;

        if let Some(d) = ttl {
            let () = conn
                .expire(&key, ttl_secs(d))
                .await
                .map_err(|e| CounterError::Backend(e.to_string()))?;
        }

        Ok(new_val)
    }

    async fn remaining_ttl(&self, key: &str) -> Result<Option<Duration>, CounterError> {
        let mut conn = self.conn().await?;
        // PTTL: -2 = missing, -1 = no expiry.
        let millis: i64 = redis::cmd("PTTL")
            .arg(self.prefixed(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| CounterError::Backend(e.to_string()))?;
        if millis < 0 {
            return Ok(None);
        }
        Ok(Some(Duration::from_millis(
            u64::try_from(millis).unwrap_or(0),
        )))
    }

    async fn delete(&self, key: &str) -> Result<bool, CounterError> {
        let mut conn = self.conn().await?;
        let deleted: i64 = conn
            .del(self.prefixed(key))
            .await
            .map_err(|e| CounterError::Backend(e.to_string()))?;
        Ok(deleted > 0)
    }

    async fn batch_get(&self, keys: &[String]) -> Result<Vec<Option<i64>>, CounterError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(self.prefixed(key));
        }
        cmd.query_async(&mut conn)
            .await
            .map_err(|e| CounterError::Backend(e.to_string()))
    }

    async fn increment_pipeline(&self, ops: &[CounterOp]) -> Result<(), CounterError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for op in ops {
            let key = self.prefixed(&op.key);
            pipe.cmd("INCRBY").arg(&key).arg(op.delta).ignore();
            if let Some(d) = op.ttl {
                pipe.cmd("EXPIRE").arg(&key).arg(ttl_secs(d)).ignore();
            }
        }
        pipe.exec_async(&mut conn)
            .await
            .map_err(|e| CounterError::Backend(e.to_string()))
    }

    async fn window_increment_batch(
        &self,
        pairs: &[WindowPair],
        now: i64,
        window_size: u64,
        increment: i64,
    ) -> Result<Vec<WindowSlot>, CounterError> {
        if pairs.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;

        let mut invocation = self.window_script.prepare_invoke();
        for pair in pairs {
            invocation
                .key(self.prefixed(&pair.window_key))
                .key(self.prefixed(&pair.counter_key));
        }
        let flat: Vec<i64> = invocation
            .arg(now)
            .arg(window_size)
            .arg(increment)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CounterError::Backend(e.to_string()))?;

        if flat.len() != pairs.len() * 2 {
            return Err(CounterError::Serialization(format!(
                "window script returned {} values for {} pairs",
                flat.len(),
                pairs.len()
            )));
        }

        Ok(flat
            .chunks_exact(2)
            .map(|chunk| WindowSlot {
                window_start: chunk[0],
                counter: chunk[1],
            })
            .collect())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CounterError> {
        let mut conn = self.conn().await?;
        let () = conn
            .expire(self.prefixed(key), ttl_secs(ttl))
            .await
            .map_err(|e| CounterError::Backend(e.to_string()))?;
        Ok(())
    }
}
