use crate::config::{check_duration, offset_by_millis};
use chrono::{DateTime, Duration, Utc};
use maestro_core::{Clock, MaestroError, MaestroResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Breaker state for one executor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Calls pass through.
    #[default]
    Closed,
    /// Calls are refused until `next_attempt_time`.
    Open,
    /// Probation after `open`; one failure reopens.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Thresholds shared by every breaker in a registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Failures within the window that open the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// A gap longer than this between failures restarts the count.
    #[serde(default = "default_failure_window_ms")]
    pub failure_window_ms: u64,
    /// How long the breaker stays open before allowing a trial call.
    #[serde(default = "default_open_duration_ms")]
    pub open_duration_ms: u64,
    /// Successes in half-open needed to close again.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_failure_window_ms() -> u64 {
    60_000
}
fn default_open_duration_ms() -> u64 {
    30_000
}
fn default_success_threshold() -> u32 {
    2
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            failure_window_ms: default_failure_window_ms(),
            open_duration_ms: default_open_duration_ms(),
            success_threshold: default_success_threshold(),
        }
    }
}

impl CircuitBreakerConfig {
    /// Reject zero thresholds and durations that cannot be represented.
    pub fn validate(&self) -> MaestroResult<()> {
        if self.failure_threshold == 0 {
            return Err(MaestroError::Config(
                "circuit_breaker.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(MaestroError::Config(
                "circuit_breaker.success_threshold must be at least 1".to_string(),
            ));
        }
        check_duration("circuit_breaker.failure_window_ms", self.failure_window_ms)?;
        check_duration("circuit_breaker.open_duration_ms", self.open_duration_ms)
    }
}

/// Breaker record for one executor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CircuitBreaker {
    /// Current state.
    pub state: CircuitState,
    /// Failures counted in the current window.
    pub failure_count: u32,
    /// Successes counted while half-open.
    pub success_count: u32,
    /// Time of the most recent failure.
    pub last_failure_time: Option<DateTime<Utc>>,
    /// When an open breaker may go half-open.
    pub next_attempt_time: Option<DateTime<Utc>>,
}

/// A state change worth announcing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitTransition {
    /// Executor whose breaker changed.
    pub executor_id: String,
    /// State before the change.
    pub from: CircuitState,
    /// State after the change.
    pub to: CircuitState,
    /// Failure count at the time of the change.
    pub failure_count: u32,
}

/// One breaker per registered executor id.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    /// Empty registry; breakers are added by `register`.
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Settings shared by every breaker.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Create (or reset) the breaker for an executor in `closed`.
    pub fn register(&self, executor_id: &str) {
        self.breakers
            .lock()
            .insert(executor_id.to_string(), CircuitBreaker::default());
    }

    /// Force a breaker back to `closed`. Returns false for unknown ids.
    pub fn reset(&self, executor_id: &str) -> bool {
        let mut breakers = self.breakers.lock();
        match breakers.get_mut(executor_id) {
            Some(breaker) => {
                *breaker = CircuitBreaker::default();
                true
            }
            None => false,
        }
    }

    /// Whether a breaker exists for `executor_id`.
    pub fn contains(&self, executor_id: &str) -> bool {
        self.breakers.lock().contains_key(executor_id)
    }

    /// Promote every open breaker whose open period has elapsed to `half-open`.
    pub fn refresh(&self) -> Vec<CircuitTransition> {
        let now = self.clock.now();
        let mut breakers = self.breakers.lock();
        let mut transitions = Vec::new();
        for (id, breaker) in breakers.iter_mut() {
            if let Some(t) = Self::promote_if_due(id, breaker, now) {
                transitions.push(t);
            }
        }
        transitions
    }

    /// Current state, applying any due `open -> half-open` promotion first.
    ///
    /// Executors without a breaker report `closed`.
    pub fn state(&self, executor_id: &str) -> CircuitState {
        let now = self.clock.now();
        let mut breakers = self.breakers.lock();
        match breakers.get_mut(executor_id) {
            Some(breaker) => {
                Self::promote_if_due(executor_id, breaker, now);
                breaker.state
            }
            None => CircuitState::Closed,
        }
    }

    /// Whether calls to `executor_id` are currently refused.
    pub fn is_open(&self, executor_id: &str) -> bool {
        self.state(executor_id) == CircuitState::Open
    }

    /// Copy of the full breaker record.
    pub fn snapshot(&self, executor_id: &str) -> Option<CircuitBreaker> {
        self.breakers.lock().get(executor_id).cloned()
    }

    /// Record a successful attempt. Returns the state change, if any.
    pub fn record_success(&self, executor_id: &str) -> Option<CircuitTransition> {
        let mut breakers = self.breakers.lock();
        let breaker = breakers.entry(executor_id.to_string()).or_default();

        match breaker.state {
            CircuitState::Closed => {
                breaker.failure_count = 0;
                None
            }
            CircuitState::HalfOpen => {
                breaker.success_count += 1;
                if breaker.success_count >= self.config.success_threshold {
                    *breaker = CircuitBreaker::default();
                    info!(executor_id = %executor_id, "Circuit breaker closed");
                    Some(CircuitTransition {
                        executor_id: executor_id.to_string(),
                        from: CircuitState::HalfOpen,
                        to: CircuitState::Closed,
                        failure_count: 0,
                    })
                } else {
                    None
                }
            }
            // A run admitted before the breaker opened; it does not count.
            CircuitState::Open => None,
        }
    }

    /// Record a failed attempt. Returns the state change, if any.
    pub fn record_failure(&self, executor_id: &str) -> Option<CircuitTransition> {
        let now = self.clock.now();
        // Out-of-range windows never expire.
        let window = i64::try_from(self.config.failure_window_ms)
            .ok()
            .and_then(Duration::try_milliseconds);

        let mut breakers = self.breakers.lock();
        let breaker = breakers.entry(executor_id.to_string()).or_default();

        if breaker
            .last_failure_time
            .is_some_and(|last| window.is_some_and(|w| now - last > w))
        {
            breaker.failure_count = 0;
        }
        breaker.failure_count += 1;
        breaker.last_failure_time = Some(now);

        let from = breaker.state;
        let opens = match from {
            CircuitState::Closed => breaker.failure_count >= self.config.failure_threshold,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };
        if !opens {
            return None;
        }

        breaker.state = CircuitState::Open;
        breaker.success_count = 0;
        breaker.next_attempt_time = Some(
            offset_by_millis(now, self.config.open_duration_ms).unwrap_or(DateTime::<Utc>::MAX_UTC),
        );
        warn!(
            executor_id = %executor_id,
            failures = breaker.failure_count,
            from = %from,
            "Circuit breaker opened"
        );
        Some(CircuitTransition {
            executor_id: executor_id.to_string(),
            from,
            to: CircuitState::Open,
            failure_count: breaker.failure_count,
        })
    }

    fn promote_if_due(
        executor_id: &str,
        breaker: &mut CircuitBreaker,
        now: DateTime<Utc>,
    ) -> Option<CircuitTransition> {
        if breaker.state != CircuitState::Open {
            return None;
        }
        if breaker.next_attempt_time.is_some_and(|at| now < at) {
            return None;
        }
        breaker.state = CircuitState::HalfOpen;
        breaker.success_count = 0;
        info!(executor_id = %executor_id, "Circuit breaker half-open");
        Some(CircuitTransition {
            executor_id: executor_id.to_string(),
            from: CircuitState::Open,
            to: CircuitState::HalfOpen,
            failure_count: breaker.failure_count,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use maestro_core::ManualClock;

    fn registry() -> (CircuitBreakerRegistry, ManualClock) {
        let clock = ManualClock::new();
        let registry =
            CircuitBreakerRegistry::new(CircuitBreakerConfig::default(), Arc::new(clock.clone()));
        registry.register("x");
        (registry, clock)
    }

    #[test]
    fn test_defaults() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 5);
        assert_eq!(config.failure_window_ms, 60_000);
        assert_eq!(config.open_duration_ms, 30_000);
        assert_eq!(config.success_threshold, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_opens_after_threshold() {
        let (registry, _clock) = registry();
        for _ in 0..4 {
            assert!(registry.record_failure("x").is_none());
            assert_eq!(registry.state("x"), CircuitState::Closed);
        }
        let t = registry.record_failure("x").unwrap();
        assert_eq!(t.to, CircuitState::Open);
        assert_eq!(t.failure_count, 5);
        assert!(registry.is_open("x"));
    }

    #[test]
    fn test_success_in_closed_resets_count() {
        let (registry, _clock) = registry();
        for _ in 0..4 {
            registry.record_failure("x");
        }
        registry.record_success("x");
        assert_eq!(registry.snapshot("x").unwrap().failure_count, 0);
        for _ in 0..4 {
            registry.record_failure("x");
        }
        assert!(!registry.is_open("x"));
    }

    #[test]
    fn test_window_expiry_restarts_count() {
        let (registry, clock) = registry();
        for _ in 0..4 {
            registry.record_failure("x");
        }
        clock.advance_ms(60_001);
        registry.record_failure("x");
        let snapshot = registry.snapshot("x").unwrap();
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.state, CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_open_duration() {
        let (registry, clock) = registry();
        for _ in 0..5 {
            registry.record_failure("x");
        }
        clock.advance_ms(29_999);
        assert!(registry.is_open("x"));
        clock.advance_ms(1);
        assert_eq!(registry.state("x"), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_closes_after_successes() {
        let (registry, clock) = registry();
        for _ in 0..5 {
            registry.record_failure("x");
        }
        clock.advance_ms(30_000);
        let promoted = registry.refresh();
        assert_eq!(promoted.len(), 1);
        assert_eq!(promoted[0].to, CircuitState::HalfOpen);

        assert!(registry.record_success("x").is_none());
        let closed = registry.record_success("x").unwrap();
        assert_eq!(closed.to, CircuitState::Closed);
        assert_eq!(registry.snapshot("x").unwrap(), CircuitBreaker::default());
    }

    #[test]
    fn test_half_open_single_failure_reopens() {
        let (registry, clock) = registry();
        for _ in 0..5 {
            registry.record_failure("x");
        }
        clock.advance_ms(30_000);
        assert_eq!(registry.state("x"), CircuitState::HalfOpen);
        registry.record_success("x");

        let t = registry.record_failure("x").unwrap();
        assert_eq!(t.from, CircuitState::HalfOpen);
        assert_eq!(t.to, CircuitState::Open);
        let snapshot = registry.snapshot("x").unwrap();
        assert_eq!(snapshot.success_count, 0);
        assert_eq!(snapshot.next_attempt_time, Some(clock.now() + Duration::seconds(30)));
    }

    #[test]
    fn test_oversized_durations_keep_breaker_open() {
        let clock = ManualClock::new();
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            failure_window_ms: u64::MAX,
            open_duration_ms: u64::MAX,
            success_threshold: 1,
        };
        assert!(config.validate().is_err());
        let registry = CircuitBreakerRegistry::new(config, Arc::new(clock.clone()));
        registry.register("x");

        registry.record_failure("x");
        clock.advance_ms(365 * 24 * 60 * 60 * 1000);
        let t = registry.record_failure("x").unwrap();
        assert_eq!(t.to, CircuitState::Open);

        clock.advance_ms(365 * 24 * 60 * 60 * 1000);
        assert!(registry.is_open("x"));
        assert!(registry.refresh().is_empty());
    }

    #[test]
    fn test_durations_within_limit_accepted() {
        let config = CircuitBreakerConfig {
            failure_window_ms: crate::config::MAX_DURATION_MS,
            open_duration_ms: crate::config::MAX_DURATION_MS,
            ..CircuitBreakerConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_register_resets_breaker() {
        let (registry, _clock) = registry();
        for _ in 0..5 {
            registry.record_failure("x");
        }
        registry.register("x");
        assert_eq!(registry.state("x"), CircuitState::Closed);
        assert!(registry.reset("x"));
        assert!(!registry.reset("unknown"));
    }

    #[test]
    fn test_unknown_executor_reports_closed() {
        let (registry, _clock) = registry();
        assert_eq!(registry.state("nobody"), CircuitState::Closed);
        assert!(!registry.contains("nobody"));
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let config = CircuitBreakerConfig {
            failure_threshold: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
