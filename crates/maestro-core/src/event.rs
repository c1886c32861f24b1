use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A job was added.
    TaskAdded,
    /// An attempt started.
    TaskStarted,
    /// A job completed.
    TaskCompleted,
    /// A job failed for good.
    TaskFailed,
    /// A failed attempt was scheduled for retry.
    TaskRetry,
    /// A job was blocked.
    TaskBlocked,
    /// A circuit breaker opened.
    CircuitOpened,
    /// A circuit breaker closed.
    CircuitClosed,
    /// A processing pass finished.
    QueueProcessed,
    /// A specification task became a job.
    TaskCompiled,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EventType::TaskAdded => "task_added",
            EventType::TaskStarted => "task_started",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskFailed => "task_failed",
            EventType::TaskRetry => "task_retry",
            EventType::TaskBlocked => "task_blocked",
            EventType::CircuitOpened => "circuit_opened",
            EventType::CircuitClosed => "circuit_closed",
            EventType::QueueProcessed => "queue_processed",
            EventType::TaskCompiled => "task_compiled",
        };
        write!(f, "{name}")
    }
}

/// A lifecycle notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEvent {
    /// Kind of event.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Job the event concerns, if any.
    pub job_id: Option<Uuid>,
    /// Executor the event concerns, if any.
    pub executor_id: Option<String>,
    /// When the event happened, by the queue clock.
    pub timestamp: DateTime<Utc>,
    /// Event-specific data.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl QueueEvent {
    /// Event with no job, executor or metadata.
    pub fn new(event_type: EventType, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type,
            job_id: None,
            executor_id: None,
            timestamp,
            metadata: serde_json::Value::Null,
        }
    }

    /// Attach the job id.
    pub fn with_job(mut self, job_id: Uuid) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Attach the executor id.
    pub fn with_executor(mut self, executor_id: impl Into<String>) -> Self {
        self.executor_id = Some(executor_id.into());
        self
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Fan-out registry of event subscribers.
///
/// Every subscriber receives every event, in emission order. Subscribers whose
/// receiver has been dropped are pruned on the next emit.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<QueueEvent>>>,
}

impl EventBus {
    /// Bus with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<QueueEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver an event to all live subscribers.
    pub fn emit(&self, event: QueueEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers as of the last emit.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
