//! Audit and metrics sinks for the Maestro platform.
//!
//! The job queue and the specification compiler write lifecycle records and
//! telemetry through the [`AuditSink`](maestro_core::AuditSink) and
//! [`MetricsSink`](maestro_core::MetricsSink) traits. This crate provides
//! the concrete implementations used at the composition root.
//!
//! # Main types
//!
//! - [`AuditLog`]: Append-only audit trail persisted as JSON lines.
//! - [`MemoryAuditStore`]: In-process audit store that can be queried by kind or subject.
//! - [`MetricsRecorder`]: In-memory counters and timers.
//! - [`TracingMetrics`]: Metrics sink that emits `tracing` events.

/// JSON-lines audit log.
pub mod audit;
/// Counter and timer sinks.
pub mod metrics;
/// Queryable in-memory audit store.
pub mod store;

pub use audit::AuditLog;
pub use metrics::{MetricsRecorder, TimerStats, TracingMetrics};
pub use store::MemoryAuditStore;
