use serde::{Deserialize, Serialize};

/// Which kind of counter a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
    Requests,
    Tokens,
    MaxParallelRequests,
}

impl CounterKind {
    /// Return the string representation used in counter keys.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requests => "requests",
            Self::Tokens => "tokens",
            Self::MaxParallelRequests => "max_parallel_requests",
        }
    }
}

impl std::fmt::Display for CounterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dimension of limitation. Iteration order is fixed so two instances
/// plan identical descriptor lists for the same request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectDimension {
    ApiKey,
    User,
    Team,
    EndUser,
    /// Per-(key, model) limits; the subject value carries the model name.
    ModelPerKey,
}

impl SubjectDimension {
    /// All dimensions in planning order.
    pub const ALL: [Self; 5] = [
        Self::ApiKey,
        Self::User,
        Self::Team,
        Self::EndUser,
        Self::ModelPerKey,
    ];

    /// Canonical dimension name used in keys and surfaced statuses.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::User => "user",
            Self::Team => "team",
            Self::EndUser => "end_user",
            Self::ModelPerKey => "model_per_key",
        }
    }
}

impl std::fmt::Display for SubjectDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One limited subject: a dimension plus the identity value it applies to.
///
/// Renders the two store keys for a window. The braces form a hash tag so
/// that the window key and its counter keys co-locate on one shard of a
/// clustered store; the compound init-or-increment operation relies on
/// this.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectKey {
    pub dimension: SubjectDimension,
    pub value: String,
}

impl SubjectKey {
    /// Create a new subject key.
    #[must_use]
    pub fn new(dimension: SubjectDimension, value: impl Into<String>) -> Self {
        Self {
            dimension,
            value: value.into(),
        }
    }

    /// Key holding the window-start timestamp: `{dim:value}:window`.
    #[must_use]
    pub fn window_key(&self) -> String {
        format!("{{{}:{}}}:window", self.dimension, self.value)
    }

    /// Key holding a counter: `{dim:value}:<kind>`.
    #[must_use]
    pub fn counter_key(&self, kind: CounterKind) -> String {
        format!("{{{}:{}}}:{kind}", self.dimension, self.value)
    }
}

impl std::fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dimension, self.value)
    }
}
