use serde::{Deserialize, Serialize};

/// Token usage reported by the downstream provider for one completed call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl Usage {
    /// Usage with only a total (prompt/completion breakdown unknown).
    #[must_use]
    pub fn total(total_tokens: u64) -> Self {
        Self {
            total_tokens,
            ..Self::default()
        }
    }
}

/// Which token count feeds the `tokens` counters after a successful call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenRateLimitKind {
    /// Prompt tokens only.
    Input,
    /// Completion tokens only.
    Output,
    /// Prompt plus completion.
    #[default]
    Total,
}

impl TokenRateLimitKind {
    /// Extract the relevant token count from a usage record.
    #[must_use]
    pub fn tokens_from(self, usage: &Usage) -> u64 {
        match self {
            Self::Input => usage.prompt_tokens,
            Self::Output => usage.completion_tokens,
            Self::Total => usage.total_tokens,
        }
    }
}
