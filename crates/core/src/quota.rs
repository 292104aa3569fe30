use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::subject::SubjectDimension;
use crate::window::WindowSize;

/// Limits for one (subject, window) pair. A field left `None` means the
/// corresponding counter is not enforced and generates no store keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum requests admitted per window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<u64>,
    /// Maximum tokens consumed per window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    /// Maximum requests in flight at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_requests: Option<u64>,
}

impl RateLimit {
    /// A limit on requests only.
    #[must_use]
    pub fn requests(limit: u64) -> Self {
        Self {
            requests: Some(limit),
            ..Self::default()
        }
    }

    /// `true` when no limit is configured at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_none() && self.tokens.is_none() && self.max_parallel_requests.is_none()
    }
}

/// Per-subject limits attached to an authenticated identity.
///
/// `BTreeMap` throughout so that descriptor planning iterates in a stable
/// order; two gateway instances must compute identical key lists for the
/// same request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaMap {
    /// Identity-wide limits per (dimension, window).
    #[serde(default)]
    limits: BTreeMap<SubjectDimension, BTreeMap<WindowSize, RateLimit>>,
    /// Per-model request limits for the (key, model) dimension:
    /// model name → window → requests per window.
    #[serde(default)]
    model_requests: BTreeMap<String, BTreeMap<WindowSize, u64>>,
}

impl QuotaMap {
    /// Create an empty quota map (everything unlimited).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the limit for an identity-wide (dimension, window) pair.
    /// Empty limits are dropped rather than stored.
    #[must_use]
    pub fn with_limit(
        mut self,
        dimension: SubjectDimension,
        window: WindowSize,
        limit: RateLimit,
    ) -> Self {
        if !limit.is_empty() {
            self.limits.entry(dimension).or_default().insert(window, limit);
        }
        self
    }

    /// Set a per-model request limit for the (key, model) dimension.
    #[must_use]
    pub fn with_model_requests(
        mut self,
        model: impl Into<String>,
        window: WindowSize,
        requests: u64,
    ) -> Self {
        self.model_requests
            .entry(model.into())
            .or_default()
            .insert(window, requests);
        self
    }

    /// Look up the limit for an identity-wide (dimension, window) pair.
    #[must_use]
    pub fn limit(&self, dimension: SubjectDimension, window: WindowSize) -> Option<RateLimit> {
        self.limits.get(&dimension)?.get(&window).copied()
    }

    /// Windows configured for a dimension, ascending.
    pub fn windows(
        &self,
        dimension: SubjectDimension,
    ) -> impl Iterator<Item = (WindowSize, RateLimit)> + '_ {
        self.limits
            .get(&dimension)
            .into_iter()
            .flat_map(|m| m.iter().map(|(w, l)| (*w, *l)))
    }

    /// Per-model request limits for a model, ascending by window.
    pub fn model_windows(
        &self,
        model: &str,
    ) -> impl Iterator<Item = (WindowSize, u64)> + '_ {
        self.model_requests
            .get(model)
            .into_iter()
            .flat_map(|m| m.iter().map(|(w, l)| (*w, *l)))
    }

    /// `true` when no limit of any kind is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty() && self.model_requests.is_empty()
    }
}

/// An authenticated caller, as resolved by the surrounding gateway's auth
/// layer, carrying its quota configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestIdentity {
    /// The API key the request authenticated with.
    pub api_key: String,
    /// Internal user the key belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Team the key belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    /// Customer-provided end-user identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_user_id: Option<String>,
    /// Limits configured for this identity.
    #[serde(default)]
    pub quotas: QuotaMap,
}

impl RequestIdentity {
    /// Create an identity with only an API key.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            user_id: None,
            team_id: None,
            end_user_id: None,
            quotas: QuotaMap::new(),
        }
    }

    /// The identity value for a dimension, if present.
    #[must_use]
    pub fn value_for(&self, dimension: SubjectDimension) -> Option<&str> {
        match dimension {
            SubjectDimension::ApiKey => Some(&self.api_key),
            SubjectDimension::User => self.user_id.as_deref(),
            SubjectDimension::Team => self.team_id.as_deref(),
            SubjectDimension::EndUser => self.end_user_id.as_deref(),
            // Per-model values are composed by the planner, not read off
            // the identity directly.
            SubjectDimension::ModelPerKey => None,
        }
    }
}
