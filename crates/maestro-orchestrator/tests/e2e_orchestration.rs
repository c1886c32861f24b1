//! End-to-end queue behavior.
//!
//! Drives a real `JobQueue` through retries, dependency blocking, circuit
//! breaking and audit writes. Time-dependent steps use a `ManualClock`.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use maestro_audit::{MemoryAuditStore, MetricsRecorder};
use maestro_core::{
    AuditKind, AuditRecord, AuditSink, EventType, MaestroError, MaestroResult, ManualClock,
    MetricsSink, QueueEvent,
};
use maestro_orchestrator::*;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

fn manual_queue() -> (Arc<JobQueue>, ManualClock) {
    let clock = ManualClock::new();
    let queue = JobQueue::new(QueueConfig::default())
        .unwrap()
        .with_clock(Arc::new(clock.clone()));
    (Arc::new(queue), clock)
}

fn drain(rx: &mut mpsc::UnboundedReceiver<QueueEvent>) -> Vec<QueueEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn types_without_passes(events: &[QueueEvent]) -> Vec<EventType> {
    events
        .iter()
        .map(|e| e.event_type)
        .filter(|t| *t != EventType::QueueProcessed)
        .collect()
}

async fn register_counting_failure(queue: &JobQueue, id: &str) -> Arc<AtomicU32> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    queue
        .register_fn(
            id,
            move |_job: Job| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<serde_json::Value, _>(MaestroError::Executor("service unavailable".into()))
                }
            },
            None,
        )
        .await;
    calls
}

#[tokio::test]
async fn test_exactly_max_attempts_then_failed() {
    let (queue, clock) = manual_queue();
    let calls = register_counting_failure(&queue, "flaky").await;
    let mut rx = queue.subscribe();

    let id = queue
        .add_task(NewJob::new("always-fails", "flaky").with_max_attempts(3))
        .await
        .unwrap();

    let mut statuses = vec![queue.get_job(id).await.unwrap().status];
    for delay_ms in [0, 2_000, 4_000, 8_000] {
        clock.advance_ms(delay_ms);
        queue.process_queue().await;
        statuses.push(queue.get_job(id).await.unwrap().status);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        statuses,
        vec![
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Queued,
            JobStatus::Failed,
            JobStatus::Failed,
        ]
    );
    let job = queue.get_job(id).await.unwrap();
    assert_eq!(job.current_attempt, 3);
    assert_eq!(job.error.as_ref().unwrap().code, JobErrorCode::ExecutorError);

    assert_eq!(
        types_without_passes(&drain(&mut rx)),
        vec![
            EventType::TaskAdded,
            EventType::TaskStarted,
            EventType::TaskRetry,
            EventType::TaskStarted,
            EventType::TaskRetry,
            EventType::TaskStarted,
            EventType::TaskFailed,
        ]
    );
}

#[tokio::test]
async fn test_retry_waits_for_backoff() {
    let (queue, clock) = manual_queue();
    let calls = register_counting_failure(&queue, "flaky").await;
    queue.add_task(NewJob::new("f", "flaky")).await.unwrap();

    queue.process_queue().await;
    clock.advance_ms(1_999);
    queue.process_queue().await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    clock.advance_ms(1);
    queue.process_queue().await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_circuit_breaker_lifecycle() {
    let (queue, clock) = manual_queue();
    let healthy = Arc::new(AtomicBool::new(false));
    let calls = Arc::new(AtomicU32::new(0));
    {
        let healthy = healthy.clone();
        let calls = calls.clone();
        queue
            .register_fn(
                "search",
                move |_job: Job| {
                    let healthy = healthy.clone();
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        if healthy.load(Ordering::SeqCst) {
                            Ok(serde_json::json!("ok"))
                        } else {
                            Err(MaestroError::Executor("503".into()))
                        }
                    }
                },
                None,
            )
            .await;
    }
    let mut rx = queue.subscribe();

    for i in 0..5 {
        queue
            .add_task(NewJob::new(format!("doomed-{i}"), "search").with_max_attempts(1))
            .await
            .unwrap();
    }
    queue.process_queue().await;
    assert_eq!(queue.breaker_state("search"), CircuitState::Open);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| e.event_type == EventType::CircuitOpened
            && e.executor_id.as_deref() == Some("search")));

    let sixth = queue.add_task(NewJob::new("sixth", "search")).await.unwrap();
    let seventh = queue.add_task(NewJob::new("seventh", "search")).await.unwrap();
    queue.process_queue().await;

    for id in [sixth, seventh] {
        let job = queue.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Blocked);
        assert_eq!(job.blocked_reason, Some(BlockReason::CircuitBreakerOpen));
        assert_eq!(job.current_attempt, 0);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    let blocked: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| e.event_type == EventType::TaskBlocked)
        .collect();
    assert_eq!(blocked.len(), 2);
    assert_eq!(blocked[0].metadata["reason"]["reason"], "circuit_breaker_open");

    clock.advance_ms(30_000);
    assert_eq!(queue.breaker_state("search"), CircuitState::HalfOpen);

    healthy.store(true, Ordering::SeqCst);
    let metrics = queue.process_queue().await;
    assert_eq!(metrics.completed, 2);
    assert_eq!(queue.breaker_state("search"), CircuitState::Closed);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| e.event_type == EventType::CircuitClosed));
    assert_eq!(queue.get_job(sixth).await.unwrap().current_attempt, 0);
}

#[tokio::test]
async fn test_half_open_single_failure_reopens() {
    let (queue, clock) = manual_queue();
    register_counting_failure(&queue, "down").await;
    for i in 0..5 {
        queue
            .add_task(NewJob::new(format!("d{i}"), "down").with_max_attempts(1))
            .await
            .unwrap();
    }
    queue.process_queue().await;
    assert_eq!(queue.breaker_state("down"), CircuitState::Open);

    clock.advance_ms(30_000);
    queue
        .add_task(NewJob::new("trial", "down").with_max_attempts(1))
        .await
        .unwrap();
    queue.process_queue().await;
    assert_eq!(queue.breaker_state("down"), CircuitState::Open);
}

#[tokio::test]
async fn test_blocked_propagates_through_chain() {
    let (queue, _clock) = manual_queue();
    register_counting_failure(&queue, "broken").await;
    queue
        .register_fn("ok", |_job: Job| async { Ok(serde_json::Value::Null) }, None)
        .await;
    let mut rx = queue.subscribe();

    let a = queue
        .add_task(NewJob::new("a", "broken").with_max_attempts(1))
        .await
        .unwrap();
    let b = queue
        .add_task(NewJob::new("b", "ok").with_dependencies(vec![a]))
        .await
        .unwrap();
    let c = queue
        .add_task(NewJob::new("c", "ok").with_dependencies(vec![b]))
        .await
        .unwrap();

    queue.process_queue().await;
    let metrics = queue.process_queue().await;

    assert_eq!(queue.get_job(a).await.unwrap().status, JobStatus::Failed);
    let job_b = queue.get_job(b).await.unwrap();
    let job_c = queue.get_job(c).await.unwrap();
    assert_eq!(job_b.status, JobStatus::Blocked);
    assert_eq!(job_b.blocked_reason, Some(BlockReason::DependencyFailed { dependency: a }));
    assert_eq!(job_c.status, JobStatus::Blocked);
    assert_eq!(job_c.blocked_reason, Some(BlockReason::DependencyFailed { dependency: b }));
    assert!(job_b.started_at.is_none());
    assert_eq!(metrics.blocked, 2);
    assert_eq!(metrics.failed, 1);

    let blocked = types_without_passes(&drain(&mut rx))
        .into_iter()
        .filter(|t| *t == EventType::TaskBlocked)
        .count();
    assert_eq!(blocked, 2);
}

#[tokio::test]
async fn test_dependent_never_runs_before_dependency() {
    let (queue, _clock) = manual_queue();
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    {
        let order = order.clone();
        queue
            .register_fn(
                "record",
                move |job: Job| {
                    let order = order.clone();
                    async move {
                        order.lock().push(job.name.clone());
                        Ok(serde_json::Value::Null)
                    }
                },
                None,
            )
            .await;
    }
    let a = queue
        .add_task(NewJob::new("a", "record").with_priority(Priority::Low))
        .await
        .unwrap();
    queue
        .add_task(
            NewJob::new("b", "record")
                .with_priority(Priority::Critical)
                .with_dependencies(vec![a]),
        )
        .await
        .unwrap();

    let first = queue.process_queue().await;
    assert_eq!(first.completed, 1);
    assert_eq!(first.pending, 1);
    queue.process_queue().await;
    assert_eq!(*order.lock(), vec!["a".to_string(), "b".to_string()]);
}

#[tokio::test]
async fn test_priority_selection_when_cap_binds() {
    let clock = ManualClock::new();
    let queue = JobQueue::new(QueueConfig::default().with_max_concurrent(2))
        .unwrap()
        .with_clock(Arc::new(clock));
    queue
        .register_fn("ok", |_job: Job| async { Ok(serde_json::Value::Null) }, None)
        .await;

    let low = queue
        .add_task(NewJob::new("low#1", "ok").with_priority(Priority::Low))
        .await
        .unwrap();
    let critical = queue
        .add_task(NewJob::new("critical#2", "ok").with_priority(Priority::Critical))
        .await
        .unwrap();
    let high = queue
        .add_task(NewJob::new("high#3", "ok").with_priority(Priority::High))
        .await
        .unwrap();

    queue.process_queue().await;
    assert_eq!(queue.get_job(critical).await.unwrap().status, JobStatus::Completed);
    assert_eq!(queue.get_job(high).await.unwrap().status, JobStatus::Completed);
    assert_eq!(queue.get_job(low).await.unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn test_selected_jobs_run_concurrently() {
    let queue = JobQueue::new(QueueConfig::default()).unwrap();
    let barrier = Arc::new(tokio::sync::Barrier::new(2));
    {
        let barrier = barrier.clone();
        queue
            .register_fn(
                "rendezvous",
                move |_job: Job| {
                    let barrier = barrier.clone();
                    async move {
                        barrier.wait().await;
                        Ok(serde_json::Value::Null)
                    }
                },
                Some(Duration::from_secs(2)),
            )
            .await;
    }
    queue.add_task(NewJob::new("left", "rendezvous")).await.unwrap();
    queue.add_task(NewJob::new("right", "rendezvous")).await.unwrap();

    let metrics = queue.process_queue().await;
    assert_eq!(metrics.completed, 2);
}

#[tokio::test]
async fn test_metrics_idempotent_without_ready_jobs() {
    let (queue, _clock) = manual_queue();
    queue
        .register_fn("ok", |_job: Job| async { Ok(serde_json::json!(1)) }, None)
        .await;
    register_counting_failure(&queue, "broken").await;
    queue.add_task(NewJob::new("a", "ok")).await.unwrap();
    queue
        .add_task(NewJob::new("b", "broken").with_max_attempts(1))
        .await
        .unwrap();

    let first = queue.process_queue().await;
    let jobs_before = serde_json::to_value(queue.get_all_jobs().await).unwrap();
    let second = queue.process_queue().await;
    let third = queue.process_queue().await;

    assert_eq!(first, second);
    assert_eq!(second, third);
    assert_eq!(first.success_rate_pct, 50.0);
    assert_eq!(
        serde_json::to_value(queue.get_all_jobs().await).unwrap(),
        jobs_before
    );
}

#[tokio::test]
async fn test_unknown_executor_fails_fast() {
    let (queue, _clock) = manual_queue();
    let id = queue.add_task(NewJob::new("orphan", "ghost")).await.unwrap();

    queue.process_queue().await;
    let job = queue.get_job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.current_attempt, 0);
    assert_eq!(job.error.unwrap().code, JobErrorCode::UnknownExecutor);
    assert!(queue.breakers().snapshot("ghost").is_none());
}

#[tokio::test]
async fn test_timeout_is_retryable_failure() {
    let queue = JobQueue::new(QueueConfig::default()).unwrap();
    queue
        .register_fn(
            "sleepy",
            |_job: Job| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(serde_json::Value::Null)
            },
            Some(Duration::from_millis(25)),
        )
        .await;
    let id = queue.add_task(NewJob::new("nap", "sleepy")).await.unwrap();

    queue.process_queue().await;
    let job = queue.get_job(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.current_attempt, 1);
    assert_eq!(job.error.unwrap().code, JobErrorCode::Timeout);
    assert_eq!(queue.breakers().snapshot("sleepy").unwrap().failure_count, 1);
}

#[tokio::test]
async fn test_audit_timeline_and_metrics_sink() {
    let store = Arc::new(MemoryAuditStore::new());
    let recorder = Arc::new(MetricsRecorder::new());
    let queue = JobQueue::new(QueueConfig::default())
        .unwrap()
        .with_audit_sink(store.clone())
        .with_metrics_sink(recorder.clone());
    queue
        .register_fn("ok", |_job: Job| async { Ok(serde_json::json!("done")) }, None)
        .await;

    let id = queue.add_task(NewJob::new("audited", "ok")).await.unwrap();
    queue.process_queue().await;

    assert_eq!(store.entries_of(AuditKind::Task).await.len(), 1);
    let timeline: Vec<String> = store
        .entries_for(&id.to_string())
        .await
        .iter()
        .map(|r| r.details["status"].as_str().unwrap_or("added").to_string())
        .collect();
    assert_eq!(timeline, vec!["added", "running", "completed"]);

    assert_eq!(recorder.counter("taskqueue.task_added"), 1);
    assert_eq!(recorder.counter("taskqueue.task_completed"), 1);
    assert_eq!(recorder.timer("taskqueue.execution_time_ms").unwrap().count, 1);
}

struct BrokenAudit;

#[async_trait]
impl AuditSink for BrokenAudit {
    async fn record(&self, _record: AuditRecord) -> MaestroResult<()> {
        Err(MaestroError::Audit("store offline".into()))
    }
}

struct BrokenMetrics;

impl MetricsSink for BrokenMetrics {
    fn increment(&self, _name: &str, _value: u64) -> MaestroResult<()> {
        Err(MaestroError::Metrics("sink offline".into()))
    }

    fn timing(&self, _name: &str, _millis: u64) -> MaestroResult<()> {
        Err(MaestroError::Metrics("sink offline".into()))
    }
}

#[tokio::test]
async fn test_sink_failures_never_block_progress() {
    let queue = JobQueue::new(QueueConfig::default())
        .unwrap()
        .with_audit_sink(Arc::new(BrokenAudit))
        .with_metrics_sink(Arc::new(BrokenMetrics));
    queue
        .register_fn("ok", |_job: Job| async { Ok(serde_json::Value::Null) }, None)
        .await;

    let id = queue.add_task(NewJob::new("resilient", "ok")).await.unwrap();
    let metrics = queue.process_queue().await;
    assert_eq!(metrics.completed, 1);
    assert_eq!(queue.get_job(id).await.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_poller_drains_mixed_workload() {
    let queue = Arc::new(JobQueue::new(QueueConfig::default().with_retry(5, 20)).unwrap());
    queue
        .register_fn("ok", |_job: Job| async { Ok(serde_json::Value::Null) }, None)
        .await;
    register_counting_failure(&queue, "broken").await;

    let root = queue
        .add_task(NewJob::new("root", "broken").with_max_attempts(2))
        .await
        .unwrap();
    queue
        .add_task(NewJob::new("child", "ok").with_dependencies(vec![root]))
        .await
        .unwrap();
    queue.add_task(NewJob::new("solo", "ok")).await.unwrap();

    let report = QueuePoller::new(queue.clone()).run_until_idle().await;
    assert!(report.drained);
    assert_eq!(report.metrics.completed, 1);
    assert_eq!(report.metrics.failed, 1);
    assert_eq!(report.metrics.blocked, 1);

    assert_eq!(queue.clear_terminal_jobs().await, 3);
    assert!(queue.get_all_jobs().await.is_empty());
}
