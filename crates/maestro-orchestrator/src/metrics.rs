use crate::types::{Job, JobStatus};
use serde::{Deserialize, Serialize};

/// Aggregate view of the queue returned by every scheduling pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetrics {
    /// All jobs in the queue.
    pub total_jobs: usize,
    /// Jobs never attempted.
    pub pending: usize,
    /// Jobs waiting for a retry.
    pub queued: usize,
    /// Jobs currently running.
    pub running: usize,
    /// Jobs that completed.
    pub completed: usize,
    /// Jobs that failed for good.
    pub failed: usize,
    /// Jobs currently blocked.
    pub blocked: usize,
    /// Mean execution time over completed jobs.
    pub avg_execution_time_ms: f64,
    /// Completed share of terminal jobs, as a percentage.
    pub success_rate_pct: f64,
}

impl QueueMetrics {
    /// Count `jobs` by status.
    pub fn from_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> Self {
        let mut m = QueueMetrics::default();
        let mut total_ms = 0i64;
        let mut timed = 0usize;

        for job in jobs {
            m.total_jobs += 1;
            match job.status {
                JobStatus::Pending => m.pending += 1,
                JobStatus::Queued => m.queued += 1,
                JobStatus::Running => m.running += 1,
                JobStatus::Completed => {
                    m.completed += 1;
                    if let Some(ms) = job.execution_time_ms() {
                        total_ms += ms;
                        timed += 1;
                    }
                }
                JobStatus::Failed => m.failed += 1,
                JobStatus::Blocked => m.blocked += 1,
            }
        }

        if timed > 0 {
            m.avg_execution_time_ms = total_ms as f64 / timed as f64;
        }
        let terminal = m.completed + m.failed;
        if terminal > 0 {
            m.success_rate_pct = m.completed as f64 * 100.0 / terminal as f64;
        }
        m
    }

    /// Jobs that may still make progress without outside intervention.
    pub fn active(&self) -> usize {
        self.pending + self.queued + self.running
    }
}
