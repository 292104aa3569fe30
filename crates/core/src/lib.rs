//! Domain model for the tollbooth admission core: windows, subjects,
//! quotas, descriptors, decisions, and configuration.

pub mod config;
pub mod descriptor;
pub mod quota;
pub mod subject;
pub mod usage;
pub mod window;

pub use config::LimiterConfig;
pub use descriptor::{
    Decision, Descriptor, DescriptorStatus, LAZY_VIOLATION_METADATA_KEY, Verdict,
};
pub use quota::{QuotaMap, RateLimit, RequestIdentity};
pub use subject::{CounterKind, SubjectDimension, SubjectKey};
pub use usage::{TokenRateLimitKind, Usage};
pub use window::WindowSize;
