use serde::{Deserialize, Serialize};

use crate::quota::RateLimit;
use crate::subject::{CounterKind, SubjectKey};
use crate::window::WindowSize;

/// One rate-limit dimension applied to one request: which subject, which
/// window, which limits. Built per request and discarded after the
/// decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub subject: SubjectKey,
    pub window: WindowSize,
    pub limit: RateLimit,
}

impl Descriptor {
    /// Create a descriptor.
    #[must_use]
    pub fn new(subject: SubjectKey, window: WindowSize, limit: RateLimit) -> Self {
        Self {
            subject,
            window,
            limit,
        }
    }

    /// The counter kinds this descriptor enforces, with their limits.
    pub fn enforced_kinds(&self) -> impl Iterator<Item = (CounterKind, u64)> + '_ {
        [
            (CounterKind::Requests, self.limit.requests),
            (CounterKind::Tokens, self.limit.tokens),
            (
                CounterKind::MaxParallelRequests,
                self.limit.max_parallel_requests,
            ),
        ]
        .into_iter()
        .filter_map(|(kind, limit)| limit.map(|l| (kind, l)))
    }
}

/// The admission outcome for a whole request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Admit,
    Reject,
}

/// Post-evaluation status of one enforced counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorStatus {
    /// The subject the counter belongs to.
    pub subject: SubjectKey,
    /// Window the counter lives in.
    pub window: WindowSize,
    /// Which counter was evaluated.
    pub kind: CounterKind,
    /// The configured limit.
    pub current_limit: u64,
    /// Capacity left in the window, clamped at zero.
    pub remaining: u64,
    /// Whether this counter exceeded its limit.
    pub over_limit: bool,
}

impl DescriptorStatus {
    /// Human-readable violation detail, as surfaced in 429 bodies and lazy
    /// annotations.
    #[must_use]
    pub fn detail(&self) -> String {
        format!(
            "Rate limit exceeded for {}: {}. Limit: {}, Remaining: {}",
            self.subject.dimension, self.subject.value, self.current_limit, self.remaining
        )
    }
}

/// Request-metadata key under which the gateway propagates a
/// [`Decision::lazy_violation`] detail downstream.
pub const LAZY_VIOLATION_METADATA_KEY: &str =
    "lazy_rate_limit_exception_for_parallel_request_limiter";

/// The admission decision returned synchronously from the pre-call path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub verdict: Verdict,
    /// One entry per enforced counter, in evaluation order.
    pub statuses: Vec<DescriptorStatus>,
    /// Seconds until the tightest violated window resets. Present only on
    /// rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    /// Violation detail carried instead of a rejection when lazy mode is
    /// enabled. Downstream stages may degrade the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lazy_violation: Option<String>,
}

impl Decision {
    /// An admit decision with the given statuses.
    #[must_use]
    pub fn admit(statuses: Vec<DescriptorStatus>) -> Self {
        Self {
            verdict: Verdict::Admit,
            statuses,
            retry_after_seconds: None,
            lazy_violation: None,
        }
    }

    /// `true` when the request may proceed downstream.
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        self.verdict == Verdict::Admit
    }

    /// The first violated counter, if any.
    #[must_use]
    pub fn first_violation(&self) -> Option<&DescriptorStatus> {
        self.statuses.iter().find(|s| s.over_limit)
    }
}
