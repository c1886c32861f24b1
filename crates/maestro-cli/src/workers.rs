use crate::config::WorkerConfig;
use async_trait::async_trait;
use maestro_core::{MaestroError, MaestroResult};
use maestro_orchestrator::{Executor, Job, JobQueue};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Stand-in for a remote worker. Sleeps for the configured latency and fails
/// a deterministic share of attempts.
pub struct SimulatedWorker {
    id: String,
    latency: Duration,
    fail_rate: f64,
}

impl SimulatedWorker {
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            id: config.id.clone(),
            latency: Duration::from_millis(config.latency_ms),
            fail_rate: config.fail_rate,
        }
    }

    /// Same job and attempt always roll the same value.
    fn roll(job: &Job) -> f64 {
        let seed = (job.id.as_u128() as u64) ^ ((job.id.as_u128() >> 64) as u64);
        let mut x =
            seed.wrapping_add(u64::from(job.current_attempt).wrapping_mul(0x9E37_79B9_7F4A_7C15));
        // splitmix64 finalizer
        x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        x ^= x >> 31;
        (x >> 11) as f64 / (1u64 << 53) as f64
    }

    fn should_fail(&self, job: &Job) -> bool {
        self.fail_rate > 0.0 && Self::roll(job) < self.fail_rate
    }
}

#[async_trait]
impl Executor for SimulatedWorker {
    async fn execute(&self, job: Job) -> MaestroResult<serde_json::Value> {
        debug!(
            worker = %self.id,
            job_id = %job.id,
            attempt = job.current_attempt + 1,
            "Simulated work started"
        );
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if self.should_fail(&job) {
            return Err(MaestroError::Executor(format!(
                "{} failed attempt {} of '{}'",
                self.id,
                job.current_attempt + 1,
                job.name
            )));
        }
        Ok(json!({
            "worker": self.id,
            "task": job.payload.get("taskId"),
            "attempt": job.current_attempt + 1,
        }))
    }
}

/// Register one executor per configured worker.
pub async fn register_all(queue: &JobQueue, workers: &[WorkerConfig]) {
    for worker in workers {
        queue
            .register_executor(
                worker.id.clone(),
                Arc::new(SimulatedWorker::new(worker)),
                worker.timeout_ms.map(Duration::from_millis),
            )
            .await;
    }
}
