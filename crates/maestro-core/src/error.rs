use thiserror::Error;

/// A convenience `Result` alias using [`MaestroError`].
pub type MaestroResult<T> = Result<T, MaestroError>;

/// Top-level error type for the Maestro platform.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Error, Debug)]
pub enum MaestroError {
    /// Invalid configuration values.
    #[error("Config error: {0}")]
    Config(String),

    /// Misuse of the job queue API (unknown dependency, bad attempt budget, ...).
    #[error("Queue error: {0}")]
    Queue(String),

    /// An executor reported a failure while running a job.
    #[error("Executor error: {0}")]
    Executor(String),

    /// A job exceeded its execution deadline.
    #[error("Timeout after {0}ms")]
    Timeout(u64),

    /// No executor is registered under the requested id.
    #[error("Unknown executor: {0}")]
    UnknownExecutor(String),

    /// A dependency cycle was found; carries the ids along the cycle.
    #[error("Dependency cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// The specification document could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// The specification failed schema or semantic validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The capability matcher was unavailable or failed.
    #[error("Matcher error: {0}")]
    Matcher(String),

    /// Writing to the audit store failed.
    #[error("Audit error: {0}")]
    Audit(String),

    /// Recording a metric failed.
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
