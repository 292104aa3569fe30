use tracing::warn;

use tollbooth_core::{
    Descriptor, RateLimit, RequestIdentity, SubjectDimension, SubjectKey, WindowSize,
};

/// Deterministic translation from an identity and the requested model to
/// the list of rate-limit descriptors that apply to this request.
///
/// Dimensions are visited in a fixed order and windows ascend within each
/// dimension, so every gateway instance computes the same key list for
/// the same request. Dimensions without any configured limit emit
/// nothing, avoiding gratuitous counter writes.
///
/// Every subject value ends in the window tag (`sk-1:rpm`,
/// `u-1:gpt-4:rpd`). Limits for the same identity at different windows
/// must count independently, and the window key is derived from the
/// subject value alone.
pub struct DescriptorPlanner;

impl DescriptorPlanner {
    /// Build the descriptor list for one request.
    #[must_use]
    pub fn plan(identity: &RequestIdentity, model: Option<&str>) -> Vec<Descriptor> {
        let mut descriptors = Vec::new();

        for dimension in SubjectDimension::ALL {
            if dimension == SubjectDimension::ModelPerKey {
                Self::plan_model(identity, model, &mut descriptors);
                continue;
            }
            let Some(value) = identity.value_for(dimension) else {
                continue;
            };
            if value.is_empty() {
                warn!(%dimension, "empty identity value, skipping dimension");
                continue;
            }
            for (window, limit) in identity.quotas.windows(dimension) {
                if limit.is_empty() {
                    continue;
                }
                descriptors.push(Descriptor::new(
                    SubjectKey::new(dimension, format!("{value}:{}", window.tag())),
                    window,
                    limit,
                ));
            }
        }

        descriptors
    }

    /// Per-model descriptors: one per configured (model, window), keyed
    /// `"{owner}:{model}:{window_tag}"` under the `model_per_key`
    /// dimension, where the owner is the user or, for user-less keys,
    /// the API key itself. Each window keeps its own subject value so
    /// monthly and weekly counters never share keys.
    fn plan_model(
        identity: &RequestIdentity,
        model: Option<&str>,
        descriptors: &mut Vec<Descriptor>,
    ) {
        let Some(model) = model else {
            return;
        };
        let owner = identity
            .user_id
            .as_deref()
            .unwrap_or(identity.api_key.as_str());

        for (window, requests) in identity.quotas.model_windows(model) {
            descriptors.push(Descriptor::new(
                SubjectKey::new(
                    SubjectDimension::ModelPerKey,
                    format!("{owner}:{model}:{}", window.tag()),
                ),
                window,
                RateLimit::requests(requests),
            ));
        }
    }

    /// Descriptors bucketed by window size, ascending (tightest first).
    #[must_use]
    pub fn bucket_by_window(descriptors: Vec<Descriptor>) -> Vec<(WindowSize, Vec<Descriptor>)> {
        let mut buckets: std::collections::BTreeMap<WindowSize, Vec<Descriptor>> =
            std::collections::BTreeMap::new();
        for descriptor in descriptors {
            buckets.entry(descriptor.window).or_default().push(descriptor);
        }
        buckets.into_iter().collect()
    }
}
