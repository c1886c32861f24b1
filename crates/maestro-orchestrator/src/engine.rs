use crate::config::offset_by_millis;
use crate::executor::RegisteredExecutor;
use crate::retry::RetryPolicy;
use crate::types::{Job, JobError, JobErrorCode, JobStatus};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, warn};

/// What a single executor run produced.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The executor returned a result.
    Success(serde_json::Value),
    /// The executor errored or timed out.
    Failure {
        /// Classified failure.
        code: JobErrorCode,
        /// Executor's error text.
        message: String,
    },
}

/// State change applied to a job after an attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// The job reached `completed`.
    Completed {
        /// Wall time of the successful attempt.
        duration_ms: u64,
    },
    /// The job went back to `queued` with a backoff delay.
    Retry {
        /// Attempt that just failed, 1-based.
        attempt: u32,
        /// Backoff before the next attempt.
        delay_ms: u64,
        /// Earliest time the job may run again.
        next_attempt_at: DateTime<Utc>,
    },
    /// The job reached `failed`.
    Failed {
        /// Attempt that failed last.
        attempt: u32,
        /// Error that ended the job.
        code: JobErrorCode,
    },
    /// The job was no longer running; nothing was applied.
    Ignored,
}

/// Runs jobs through their executors and applies the retry policy.
#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    retry: RetryPolicy,
    default_timeout: Duration,
}

impl ExecutionEngine {
    /// Engine with the given retry policy and fallback timeout.
    pub fn new(retry: RetryPolicy, default_timeout: Duration) -> Self {
        Self {
            retry,
            default_timeout,
        }
    }

    /// Backoff applied after failed attempts.
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Run one attempt, racing the executor against its deadline.
    ///
    /// The executor runs on its own task so a panic is contained and
    /// reported as a failure; on timeout the task is aborted.
    pub async fn run(&self, registered: Option<RegisteredExecutor>, job: Job) -> AttemptOutcome {
        let Some(registered) = registered else {
            return AttemptOutcome::Failure {
                code: JobErrorCode::UnknownExecutor,
                message: format!("no executor registered for '{}'", job.executor_id),
            };
        };

        let timeout = registered.timeout.unwrap_or(self.default_timeout);
        let executor = registered.executor;
        let job_id = job.id;
        let mut handle = tokio::spawn(async move { executor.execute(job).await });

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(Ok(value))) => AttemptOutcome::Success(value),
            Ok(Ok(Err(e))) => AttemptOutcome::Failure {
                code: JobErrorCode::ExecutorError,
                message: e.to_string(),
            },
            Ok(Err(join_err)) => {
                warn!(job_id = %job_id, error = %join_err, "Executor task aborted");
                AttemptOutcome::Failure {
                    code: JobErrorCode::Panicked,
                    message: format!("executor panicked: {join_err}"),
                }
            }
            Err(_) => {
                handle.abort();
                AttemptOutcome::Failure {
                    code: JobErrorCode::Timeout,
                    message: format!("timed out after {}ms", timeout.as_millis()),
                }
            }
        }
    }

    /// Apply an attempt's outcome to a running job.
    ///
    /// A job that is not `running` is left untouched, so a job reaches a
    /// terminal state at most once.
    pub fn apply(&self, job: &mut Job, outcome: AttemptOutcome, now: DateTime<Utc>) -> Transition {
        if job.status != JobStatus::Running {
            debug!(job_id = %job.id, status = %job.status, "Outcome for non-running job ignored");
            return Transition::Ignored;
        }

        match outcome {
            AttemptOutcome::Success(value) => {
                job.status = JobStatus::Completed;
                job.result = Some(value);
                job.error = None;
                job.next_attempt_at = None;
                job.completed_at = Some(now);
                let duration_ms = job.execution_time_ms().unwrap_or(0) as u64;
                Transition::Completed { duration_ms }
            }
            AttemptOutcome::Failure { code, message } => {
                job.error = Some(JobError {
                    code,
                    message,
                    timestamp: now,
                });

                if !code.is_retryable() {
                    job.status = JobStatus::Failed;
                    job.completed_at = Some(now);
                    return Transition::Failed {
                        attempt: job.current_attempt,
                        code,
                    };
                }

                job.current_attempt = (job.current_attempt + 1).min(job.max_attempts);
                if job.current_attempt < job.max_attempts {
                    let delay_ms = self.retry.delay_ms(job.current_attempt);
                    if let Some(next_attempt_at) = offset_by_millis(now, delay_ms) {
                        job.status = JobStatus::Queued;
                        job.next_attempt_at = Some(next_attempt_at);
                        return Transition::Retry {
                            attempt: job.current_attempt,
                            delay_ms,
                            next_attempt_at,
                        };
                    }
                    warn!(job_id = %job.id, delay_ms, "Retry delay out of range, failing job");
                }
                job.status = JobStatus::Failed;
                job.next_attempt_at = None;
                job.completed_at = Some(now);
                Transition::Failed {
                    attempt: job.current_attempt,
                    code,
                }
            }
        }
    }
}
