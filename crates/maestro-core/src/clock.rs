use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Source of wall-clock time for scheduling decisions.
///
/// Retry delays and circuit breaker windows read time through this trait so
/// tests can move time forward without sleeping.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same underlying instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    current: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Start the clock at the current system time.
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    /// Start the clock at a fixed instant.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            current: Arc::new(Mutex::new(start)),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut current = self.current.lock();
        *current += by;
    }

    /// Move the clock forward by a number of milliseconds.
    pub fn advance_ms(&self, ms: i64) {
        self.advance(Duration::milliseconds(ms));
    }

    /// Pin the clock to an instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.current.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock()
    }
}

/// Generate a short random identifier with a prefix, e.g. `spec-1a2b3c4d`.
pub fn short_id(prefix: &str) -> String {
    let simple = Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", &simple[..8])
}
