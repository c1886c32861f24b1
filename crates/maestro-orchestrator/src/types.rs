use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Scheduling priority of a job.
///
/// Ordered so that `Critical > High > Medium > Low`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Runs last.
    Low,
    /// Default.
    #[default]
    Medium,
    /// Runs before medium.
    High,
    /// Runs first.
    Critical,
}

impl Priority {
    /// Lenient parse; unknown strings map to `Medium`.
    pub fn parse_level(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "low" => Priority::Low,
            "high" => Priority::High,
            "critical" => Priority::Critical,
            _ => Priority::Medium,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Status of a job in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, never attempted.
    Pending,
    /// A retry is scheduled at `next_attempt_at`.
    Queued,
    /// An attempt is in flight.
    Running,
    /// Finished successfully.
    Completed,
    /// Out of attempts or not retryable.
    Failed,
    /// Held back; see `blocked_reason`.
    Blocked,
}

impl JobStatus {
    /// `completed` or `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// `pending` or `queued`.
    pub fn is_waiting(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Queued)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// Why a job is `blocked`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BlockReason {
    /// A dependency failed or is itself dependency-blocked. Permanent.
    DependencyFailed {
        /// The dead-end dependency that caused the block.
        dependency: Uuid,
    },
    /// The executor's circuit breaker is open. Lifted once the breaker leaves `open`.
    CircuitBreakerOpen,
}

impl BlockReason {
    /// Whether the block can never clear.
    pub fn is_permanent(&self) -> bool {
        matches!(self, BlockReason::DependencyFailed { .. })
    }

    /// Stable snake_case name.
    pub fn code(&self) -> &'static str {
        match self {
            BlockReason::DependencyFailed { .. } => "dependency_failed",
            BlockReason::CircuitBreakerOpen => "circuit_breaker_open",
        }
    }
}

/// Classification of a job failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorCode {
    /// The executor returned an error.
    ExecutorError,
    /// The executor did not finish before the deadline.
    Timeout,
    /// The executor panicked.
    Panicked,
    /// No executor registered under the job's `executor_id`. Not retried.
    UnknownExecutor,
}

impl JobErrorCode {
    /// Whether a failure with this code may be retried.
    pub fn is_retryable(self) -> bool {
        !matches!(self, JobErrorCode::UnknownExecutor)
    }
}

impl std::fmt::Display for JobErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobErrorCode::ExecutorError => write!(f, "executor_error"),
            JobErrorCode::Timeout => write!(f, "timeout"),
            JobErrorCode::Panicked => write!(f, "panicked"),
            JobErrorCode::UnknownExecutor => write!(f, "unknown_executor"),
        }
    }
}

/// The last error a job ran into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    /// Classified failure.
    pub code: JobErrorCode,
    /// Human-readable detail.
    pub message: String,
    /// When the error happened.
    pub timestamp: DateTime<Utc>,
}

/// A unit of work in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique id.
    pub id: Uuid,
    /// Creation order within the owning queue.
    pub seq: u64,
    /// Short display name.
    pub name: String,
    /// Longer description.
    pub description: String,
    /// Scheduling priority.
    pub priority: Priority,
    /// Current status.
    pub status: JobStatus,
    /// Jobs that must complete first.
    pub depends_on: Vec<Uuid>,
    /// Opaque data handed to the executor untouched.
    pub payload: serde_json::Value,
    /// Executor that runs this job.
    pub executor_id: String,
    /// Attempts allowed before failing.
    pub max_attempts: u32,
    /// Attempts made so far.
    pub current_attempt: u32,
    /// Earliest time the next retry may start.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// When the job was added.
    pub created_at: DateTime<Utc>,
    /// Start of the latest attempt.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Value returned by the successful attempt.
    pub result: Option<serde_json::Value>,
    /// Most recent error.
    pub error: Option<JobError>,
    /// Why the job is blocked.
    pub blocked_reason: Option<BlockReason>,
    /// Free-form data carried with the job.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Job {
    /// Milliseconds between the last start and completion, if both are set.
    pub fn execution_time_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds().max(0)),
            _ => None,
        }
    }

    /// Blocked for a reason that will never clear on its own.
    pub fn is_permanently_blocked(&self) -> bool {
        self.status == JobStatus::Blocked
            && self
                .blocked_reason
                .as_ref()
                .is_some_and(BlockReason::is_permanent)
    }

    /// Failed, or blocked for good: dependents can never run.
    pub fn is_dead_end(&self) -> bool {
        self.status == JobStatus::Failed || self.is_permanently_blocked()
    }
}

/// Request to add a job to the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    /// Short display name.
    pub name: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: Priority,
    /// Ids of jobs that must complete first.
    #[serde(default)]
    pub depends_on: Vec<Uuid>,
    /// Data handed to the executor.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Executor that runs the job.
    pub executor_id: String,
    /// Attempts allowed, at least 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Free-form data carried with the job.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

fn default_max_attempts() -> u32 {
    3
}

impl NewJob {
    /// Job with default priority, no dependencies and 3 attempts.
    pub fn new(name: impl Into<String>, executor_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            priority: Priority::Medium,
            depends_on: Vec::new(),
            payload: serde_json::Value::Null,
            executor_id: executor_id.into(),
            max_attempts: default_max_attempts(),
            metadata: HashMap::new(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the dependencies.
    pub fn with_dependencies(mut self, deps: Vec<Uuid>) -> Self {
        self.depends_on = deps;
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the attempt limit.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Add one metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
