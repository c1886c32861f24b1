use crate::job_queue::JobQueue;
use crate::metrics::QueueMetrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Limits for [`QueuePoller::run_until_idle`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    /// Upper bound on the wait between passes.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up after this many passes.
    #[serde(default = "default_max_passes")]
    pub max_passes: usize,
}

fn default_poll_interval_ms() -> u64 {
    250
}
fn default_max_passes() -> usize {
    10_000
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_passes: default_max_passes(),
        }
    }
}

/// Result of driving a queue until it has nothing left to do.
#[derive(Debug, Clone, PartialEq)]
pub struct PollReport {
    /// Processing passes run.
    pub passes: usize,
    /// `false` when `max_passes` ran out first.
    pub drained: bool,
    /// Queue counts after the last pass.
    pub metrics: QueueMetrics,
}

/// Caller-side loop around [`JobQueue::process_queue`].
pub struct QueuePoller {
    queue: Arc<JobQueue>,
    config: PollerConfig,
}

impl QueuePoller {
    /// Poller with default settings.
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self {
            queue,
            config: PollerConfig::default(),
        }
    }

    /// Replace the settings.
    pub fn with_config(mut self, config: PollerConfig) -> Self {
        self.config = config;
        self
    }

    /// Process the queue until no job can make further progress.
    ///
    /// Between passes the poller sleeps until the earliest scheduled retry,
    /// never longer than the poll interval. A pass that starts nothing while
    /// work is waiting also sleeps.
    pub async fn run_until_idle(&self) -> PollReport {
        let interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut passes = 0;
        let mut metrics = self.queue.metrics().await;

        while passes < self.config.max_passes {
            let before = metrics.clone();
            metrics = self.queue.process_queue().await;
            passes += 1;

            let outlook = self.queue.outlook().await;
            if outlook.is_idle() {
                info!(
                    passes,
                    completed = metrics.completed,
                    failed = metrics.failed,
                    blocked = metrics.blocked,
                    "Queue drained"
                );
                return PollReport {
                    passes,
                    drained: true,
                    metrics,
                };
            }

            if metrics == before {
                let now = self.queue.clock().now();
                let wait = outlook
                    .next_retry_at
                    .and_then(|at| (at - now).to_std().ok())
                    .map_or(interval, |until| until.min(interval));
                debug!(
                    passes,
                    wait_ms = wait.as_millis() as u64,
                    active = outlook.active,
                    circuit_blocked = outlook.circuit_blocked,
                    "Nothing runnable, waiting"
                );
                tokio::time::sleep(wait).await;
            }
        }

        warn!(passes, "Poller stopped before the queue drained");
        PollReport {
            passes,
            drained: false,
            metrics,
        }
    }
}
