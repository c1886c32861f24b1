use crate::MaestroResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Discriminator for audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditKind {
    /// A job was added to the queue.
    #[serde(rename = "taskqueue_task")]
    Task,
    /// A job changed status.
    #[serde(rename = "taskqueue_status")]
    Status,
    /// A specification was compiled.
    #[serde(rename = "gma_compilation")]
    Compilation,
}

impl std::fmt::Display for AuditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditKind::Task => write!(f, "taskqueue_task"),
            AuditKind::Status => write!(f, "taskqueue_status"),
            AuditKind::Compilation => write!(f, "gma_compilation"),
        }
    }
}

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Kind of record.
    #[serde(rename = "type")]
    pub kind: AuditKind,
    /// Job id or specification id the record is about.
    pub subject: String,
    /// Human-readable one-line summary.
    pub summary: String,
    /// When the record was produced.
    pub timestamp: DateTime<Utc>,
    /// Record-specific data.
    #[serde(default)]
    pub details: serde_json::Value,
}

impl AuditRecord {
    /// Record with empty details.
    pub fn new(
        kind: AuditKind,
        subject: impl Into<String>,
        summary: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            subject: subject.into(),
            summary: summary.into(),
            timestamp,
            details: serde_json::Value::Null,
        }
    }

    /// Replace the details.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Destination for audit records.
///
/// Writers treat failures as non-fatal: they are logged and otherwise ignored.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append one record.
    async fn record(&self, record: AuditRecord) -> MaestroResult<()>;
}

/// Destination for named counters and timers.
pub trait MetricsSink: Send + Sync {
    /// Add `value` to the counter `name`.
    fn increment(&self, name: &str, value: u64) -> MaestroResult<()>;

    /// Record a duration sample for the timer `name`.
    fn timing(&self, name: &str, millis: u64) -> MaestroResult<()>;
}

/// Audit sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAuditSink;

#[async_trait]
impl AuditSink for NoopAuditSink {
    async fn record(&self, _record: AuditRecord) -> MaestroResult<()> {
        Ok(())
    }
}

/// Metrics sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn increment(&self, _name: &str, _value: u64) -> MaestroResult<()> {
        Ok(())
    }

    fn timing(&self, _name: &str, _millis: u64) -> MaestroResult<()> {
        Ok(())
    }
}
