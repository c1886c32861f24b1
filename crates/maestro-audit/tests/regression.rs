#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Regression tests for the audit and metrics sinks used behind trait objects.

use chrono::{Duration, TimeZone, Utc};
use maestro_audit::{AuditLog, MemoryAuditStore, MetricsRecorder, TracingMetrics};
use maestro_core::{AuditKind, AuditRecord, AuditSink, MetricsSink};
use std::sync::Arc;

fn timeline() -> Vec<AuditRecord> {
    let t0 = Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap();
    vec![
        AuditRecord::new(AuditKind::Compilation, "spec-1", "Compiled 'spec-1' into 1 job(s)", t0),
        AuditRecord::new(AuditKind::Task, "job-a", "Added", t0 + Duration::milliseconds(1)),
        AuditRecord::new(AuditKind::Status, "job-a", "running", t0 + Duration::milliseconds(2))
            .with_details(serde_json::json!({"status": "running", "attempt": 1})),
        AuditRecord::new(AuditKind::Status, "job-a", "completed", t0 + Duration::milliseconds(9))
            .with_details(serde_json::json!({"status": "completed", "durationMs": 7})),
    ]
}

// --- AuditLog ---

#[tokio::test]
async fn test_audit_log_round_trips_timeline() {
    let tmp = tempfile::tempdir().unwrap();
    let log = Arc::new(AuditLog::new(tmp.path().join("nested").join("audit")));
    let sink: Arc<dyn AuditSink> = log.clone();

    for record in timeline() {
        sink.record(record).await.unwrap();
    }
    log.flush().await.unwrap();

    let content = tokio::fs::read_to_string(log.path()).await.unwrap();
    let parsed: Vec<AuditRecord> = content
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(parsed.len(), 4);
    assert_eq!(parsed[0].kind, AuditKind::Compilation);
    assert_eq!(parsed[3].details["durationMs"], 7);
    assert!(parsed.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test]
async fn test_audit_log_appends_across_instances() {
    let tmp = tempfile::tempdir().unwrap();
    for _ in 0..2 {
        let log = AuditLog::new(tmp.path().to_path_buf());
        log.record(timeline().remove(1)).await.unwrap();
        log.flush().await.unwrap();
    }
    let content = tokio::fs::read_to_string(tmp.path().join("audit.jsonl"))
        .await
        .unwrap();
    assert_eq!(content.lines().count(), 2);
}

// --- MemoryAuditStore ---

#[tokio::test]
async fn test_memory_store_filters() {
    let store = Arc::new(MemoryAuditStore::new());
    let sink: Arc<dyn AuditSink> = store.clone();
    for record in timeline() {
        sink.record(record).await.unwrap();
    }

    assert_eq!(store.count().await, 4);
    let statuses: Vec<String> = store
        .entries_of(AuditKind::Status)
        .await
        .into_iter()
        .map(|r| r.summary)
        .collect();
    assert_eq!(statuses, vec!["running", "completed"]);
    assert_eq!(store.entries_for("job-a").await.len(), 3);
    assert!(store.entries_for("job-b").await.is_empty());
}

// --- Metrics ---

#[test]
fn test_recorder_behind_trait_object() {
    let recorder = Arc::new(MetricsRecorder::new());
    let sink: Arc<dyn MetricsSink> = recorder.clone();

    sink.increment("taskqueue.task_added", 1).unwrap();
    sink.increment("taskqueue.task_added", 2).unwrap();
    sink.timing("taskqueue.execution_time_ms", 40).unwrap();
    sink.timing("taskqueue.execution_time_ms", 10).unwrap();

    assert_eq!(recorder.counter("taskqueue.task_added"), 3);
    let stats = recorder.timer("taskqueue.execution_time_ms").unwrap();
    assert_eq!((stats.count, stats.min_ms, stats.max_ms), (2, 10, 40));
    assert_eq!(stats.mean_ms(), 25.0);

    let report = recorder.to_json();
    assert_eq!(report["counters"]["taskqueue.task_added"], 3);
}

#[test]
fn test_tracing_metrics_never_fails() {
    let sink: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);
    assert!(sink.increment("gma.compilations", 1).is_ok());
    assert!(sink.timing("taskqueue.execution_time_ms", 5).is_ok());
}
