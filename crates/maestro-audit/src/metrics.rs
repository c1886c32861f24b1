use maestro_core::{MaestroResult, MetricsSink};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

/// Aggregated samples for one timer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TimerStats {
    /// Number of recorded samples.
    pub count: u64,
    /// Sum of all samples.
    pub total_ms: u64,
    /// Smallest sample.
    pub min_ms: u64,
    /// Largest sample.
    pub max_ms: u64,
}

impl TimerStats {
    fn observe(&mut self, millis: u64) {
        if self.count == 0 {
            self.min_ms = millis;
            self.max_ms = millis;
        } else {
            self.min_ms = self.min_ms.min(millis);
            self.max_ms = self.max_ms.max(millis);
        }
        self.count += 1;
        self.total_ms += millis;
    }

    /// Average sample, or 0 when nothing was recorded.
    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms as f64 / self.count as f64
        }
    }
}

#[derive(Default)]
struct Samples {
    counters: HashMap<String, u64>,
    timers: HashMap<String, TimerStats>,
}

/// In-memory metrics sink.
#[derive(Default)]
pub struct MetricsRecorder {
    samples: Mutex<Samples>,
}

impl MetricsRecorder {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of a counter (0 if never incremented).
    pub fn counter(&self, name: &str) -> u64 {
        self.samples.lock().counters.get(name).copied().unwrap_or(0)
    }

    /// Aggregated samples for a timer, if any were recorded.
    pub fn timer(&self, name: &str) -> Option<TimerStats> {
        self.samples.lock().timers.get(name).copied()
    }

    /// Serialize all counters and timers (for the CLI report).
    pub fn to_json(&self) -> serde_json::Value {
        let samples = self.samples.lock();
        serde_json::json!({
            "counters": samples.counters,
            "timers": samples.timers,
        })
    }
}

impl MetricsSink for MetricsRecorder {
    fn increment(&self, name: &str, value: u64) -> MaestroResult<()> {
        let mut samples = self.samples.lock();
        *samples.counters.entry(name.to_string()).or_insert(0) += value;
        Ok(())
    }

    fn timing(&self, name: &str, millis: u64) -> MaestroResult<()> {
        let mut samples = self.samples.lock();
        samples
            .timers
            .entry(name.to_string())
            .or_default()
            .observe(millis);
        Ok(())
    }
}

/// Metrics sink that turns every sample into a `tracing` debug event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn increment(&self, name: &str, value: u64) -> MaestroResult<()> {
        tracing::debug!(metric = %name, value, "counter");
        Ok(())
    }

    fn timing(&self, name: &str, millis: u64) -> MaestroResult<()> {
        tracing::debug!(metric = %name, millis, "timer");
        Ok(())
    }
}
