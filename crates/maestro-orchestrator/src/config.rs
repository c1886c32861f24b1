use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryPolicy;
use chrono::{DateTime, TimeDelta, Utc};
use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Upper bound for every configured delay, window and timeout (30 days).
pub const MAX_DURATION_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// `at + millis`, or `None` when the result leaves chrono's range.
pub(crate) fn offset_by_millis(at: DateTime<Utc>, millis: u64) -> Option<DateTime<Utc>> {
    let millis = i64::try_from(millis).ok()?;
    at.checked_add_signed(TimeDelta::try_milliseconds(millis)?)
}

/// Reject a duration field above [`MAX_DURATION_MS`].
pub(crate) fn check_duration(field: &str, millis: u64) -> MaestroResult<()> {
    if millis > MAX_DURATION_MS {
        return Err(MaestroError::Config(format!(
            "{field} ({millis}) exceeds the {MAX_DURATION_MS}ms limit"
        )));
    }
    Ok(())
}

/// Tunables for a [`JobQueue`](crate::JobQueue).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Upper bound on jobs running at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Deadline for executors registered without their own timeout.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Backoff between attempts.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Breaker settings applied to every executor.
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

fn default_max_concurrent() -> usize {
    5
}
fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            default_timeout_ms: default_timeout_ms(),
            retry: RetryPolicy::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl QueueConfig {
    /// Set the concurrency cap.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the retry delays.
    pub fn with_retry(mut self, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.retry = RetryPolicy {
            base_delay_ms,
            max_delay_ms,
        };
        self
    }

    /// Set the timeout used when an executor has none.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Timeout used when an executor has none.
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    /// Check every setting before the queue is built.
    pub fn validate(&self) -> MaestroResult<()> {
        if self.max_concurrent == 0 {
            return Err(MaestroError::Config(
                "max_concurrent must be at least 1".to_string(),
            ));
        }
        if self.default_timeout_ms == 0 {
            return Err(MaestroError::Config(
                "default_timeout_ms must be positive".to_string(),
            ));
        }
        check_duration("default_timeout_ms", self.default_timeout_ms)?;
        check_duration("retry.max_delay_ms", self.retry.max_delay_ms)?;
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(MaestroError::Config(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        self.circuit_breaker.validate()
    }
}
