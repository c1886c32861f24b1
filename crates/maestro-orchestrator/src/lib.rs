//! Dependency-aware job orchestration for Maestro.
//!
//! Jobs declare the jobs they depend on, a priority and the id of the
//! executor that performs them. The [`JobQueue`] picks runnable jobs each
//! pass, runs them concurrently under a cap, retries transient failures
//! with capped exponential backoff and isolates failing executors behind
//! per-executor circuit breakers.
//!
//! # Main types
//!
//! - [`JobQueue`]: Facade owning jobs, executors and breakers; drives scheduling passes.
//! - [`QueuePoller`]: Convenience loop calling `process_queue` until the queue drains.
//! - [`DependencyGraph`]: Cycle detection and deterministic topological order.
//! - [`CircuitBreakerRegistry`]: Closed/open/half-open state per executor.
//! - [`Scheduler`]: Ready-set computation, blocking and priority selection.
//! - [`ExecutionEngine`]: Runs one attempt with a deadline and applies the retry policy.
//! - [`Executor`]: Trait implemented by anything that performs a job.

/// Per-executor failure isolation.
pub mod circuit_breaker;
/// Queue configuration.
pub mod config;
/// Attempt execution and retry transitions.
pub mod engine;
/// Executor trait and registry.
pub mod executor;
/// Dependency graph, cycle detection and topological ordering.
pub mod graph;
/// The job queue facade.
pub mod job_queue;
/// Aggregate queue metrics.
pub mod metrics;
/// Polling loop around the queue.
pub mod poller;
/// Backoff policy.
pub mod retry;
/// Ready-set selection.
pub mod scheduler;
/// Job arena.
pub mod store;
/// Job model.
pub mod types;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, CircuitTransition,
};
pub use config::{QueueConfig, MAX_DURATION_MS};
pub use engine::{AttemptOutcome, ExecutionEngine, Transition};
pub use executor::{Executor, ExecutorRegistry, FnExecutor, RegisteredExecutor};
pub use graph::DependencyGraph;
pub use job_queue::{JobQueue, QueueOutlook};
pub use metrics::QueueMetrics;
pub use poller::{PollReport, PollerConfig, QueuePoller};
pub use retry::RetryPolicy;
pub use scheduler::{PassPlan, Scheduler};
pub use store::JobStore;
pub use types::{BlockReason, Job, JobError, JobErrorCode, JobStatus, NewJob, Priority};
