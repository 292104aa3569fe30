//! Admission orchestration for tollbooth: descriptor planning, the
//! fixed-window engine, the two-tier counter cache, the admit/reject
//! decision, and post-call reconciliation.
//!
//! The entry point is [`RateLimiter`]: `decide` before the downstream
//! call, `on_success` / `on_failure` after it. All counter I/O degrades
//! to the process-local tier on store failure; the only outcome a caller
//! ever observes is the decision itself.

pub mod engine;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod planner;
pub mod tiered;

pub use engine::WindowEngine;
pub use error::LimiterError;
pub use limiter::{RateLimiter, RateLimiterBuilder};
pub use metrics::{LimiterMetrics, MetricsSnapshot};
pub use planner::DescriptorPlanner;
pub use tiered::TieredCounters;
