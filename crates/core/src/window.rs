use serde::{Deserialize, Serialize};

/// Fixed time window over which request and token counters accumulate.
///
/// The seconds values are baked into persisted counter TTLs; changing them
/// for a running deployment requires a key-namespace rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSize {
    /// 60-second window ("rpm").
    Minute,
    /// 1-hour window ("rph").
    Hour,
    /// 24-hour window ("rpd").
    Day,
    /// 7-day window ("rpw").
    Week,
    /// 30-day window ("rpmo").
    Month,
}

impl WindowSize {
    /// All window sizes, tightest first. Admission evaluates buckets in this
    /// order so the most common violation (per-minute) is detected with the
    /// fewest round-trips.
    pub const ALL: [Self; 5] = [
        Self::Minute,
        Self::Hour,
        Self::Day,
        Self::Week,
        Self::Month,
    ];

    /// Return the window duration in seconds.
    #[must_use]
    pub fn seconds(self) -> u64 {
        match self {
            Self::Minute => 60,
            Self::Hour => 3_600,
            Self::Day => 86_400,
            Self::Week => 604_800,
            Self::Month => 2_592_000,
        }
    }

    /// Short tag used in per-model subject values and telemetry.
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Minute => "rpm",
            Self::Hour => "rph",
            Self::Day => "rpd",
            Self::Week => "rpw",
            Self::Month => "rpmo",
        }
    }

    /// Look up a window size by its duration in seconds.
    #[must_use]
    pub fn from_seconds(seconds: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|w| w.seconds() == seconds)
    }
}

impl Ord for WindowSize {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.seconds().cmp(&other.seconds())
    }
}

impl PartialOrd for WindowSize {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for WindowSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}
