use serde::{Deserialize, Serialize};

/// Exponential backoff between job attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Cap for exponential backoff.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_base_delay_ms() -> u64 {
    2_000
}
fn default_max_delay_ms() -> u64 {
    60_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failed attempt (1-based):
    /// `min(base * 2^(attempt - 1), max)`.
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let factor = 2u64.checked_pow(exponent).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }
}
