use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::usage::TokenRateLimitKind;

/// Limiter configuration, captured into a record at startup and threaded
/// to components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Window size in seconds used for counters that have no natural
    /// window of their own (the parallel-slot counters).
    pub window_size_default: u64,
    /// When set, limit violations annotate the request instead of
    /// rejecting it, so downstream stages can degrade it.
    pub lazy_rejection_enabled: bool,
    /// Which token count feeds token counters post-call.
    pub token_rate_limit_kind: TokenRateLimitKind,
    /// Diagnostic mode: never touch the remote store.
    pub local_only: bool,
    /// Interval between flushes of buffered remote increments.
    pub batch_flush_interval_seconds: u64,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_size_default: 60,
            lazy_rejection_enabled: false,
            token_rate_limit_kind: TokenRateLimitKind::Total,
            local_only: false,
            batch_flush_interval_seconds: 1,
        }
    }
}

impl LimiterConfig {
    /// The flush interval as a [`Duration`].
    #[must_use]
    pub fn batch_flush_interval(&self) -> Duration {
        Duration::from_secs(self.batch_flush_interval_seconds.max(1))
    }

    /// The default window as a [`Duration`].
    #[must_use]
    pub fn default_window(&self) -> Duration {
        Duration::from_secs(self.window_size_default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = LimiterConfig::default();
        assert_eq!(config.window_size_default, 60);
        assert!(!config.lazy_rejection_enabled);
        assert_eq!(config.token_rate_limit_kind, TokenRateLimitKind::Total);
        assert!(!config.local_only);
        assert_eq!(config.batch_flush_interval_seconds, 1);
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: LimiterConfig =
            serde_json::from_str(r#"{"lazy_rejection_enabled": true}"#).unwrap();
        assert!(config.lazy_rejection_enabled);
        assert_eq!(config.window_size_default, 60);
    }

    #[test]
    fn flush_interval_floor() {
        let config = LimiterConfig {
            batch_flush_interval_seconds: 0,
            ..LimiterConfig::default()
        };
        assert_eq!(config.batch_flush_interval(), Duration::from_secs(1));
    }
}
