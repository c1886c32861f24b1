//! Core types and error definitions for the Maestro orchestration platform.
//!
//! This crate provides the foundational pieces shared by every Maestro crate:
//! the unified error type, an injectable clock, lifecycle events with their
//! observer registry, and the sink traits external stores plug into.
//!
//! # Main types
//!
//! - [`MaestroError`]: Unified error enum for all Maestro subsystems.
//! - [`MaestroResult`]: Convenience alias for `Result<T, MaestroError>`.
//! - [`Clock`]: Time source; [`SystemClock`] in production, [`ManualClock`] in tests.
//! - [`QueueEvent`] / [`EventType`]: Lifecycle notifications emitted by the queue and compiler.
//! - [`EventBus`]: Observer registry fanning events out to subscribers.
//! - [`AuditSink`] / [`MetricsSink`]: Best-effort persistence and telemetry seams.

/// Time sources and identifier helpers.
pub mod clock;
/// Error types.
pub mod error;
/// Lifecycle events and the subscriber registry.
pub mod event;
/// Audit and metrics sink traits.
pub mod sink;

pub use clock::{short_id, Clock, ManualClock, SystemClock};
pub use error::{MaestroError, MaestroResult};
pub use event::{EventBus, EventType, QueueEvent};
pub use sink::{AuditKind, AuditRecord, AuditSink, MetricsSink, NoopAuditSink, NoopMetricsSink};
