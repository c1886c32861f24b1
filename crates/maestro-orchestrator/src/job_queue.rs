use crate::circuit_breaker::{CircuitBreakerRegistry, CircuitState, CircuitTransition};
use crate::config::QueueConfig;
use crate::engine::{AttemptOutcome, ExecutionEngine, Transition};
use crate::executor::{Executor, ExecutorRegistry, FnExecutor};
use crate::metrics::QueueMetrics;
use crate::scheduler::Scheduler;
use crate::store::JobStore;
use crate::types::{BlockReason, Job, JobErrorCode, JobStatus, NewJob};
use chrono::{DateTime, Utc};
use futures_util::stream::{FuturesUnordered, StreamExt};
use maestro_core::{
    AuditKind, AuditRecord, AuditSink, Clock, EventBus, EventType, MaestroError, MaestroResult,
    MetricsSink, NoopAuditSink, NoopMetricsSink, QueueEvent, SystemClock,
};
use serde_json::json;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

struct QueueState {
    jobs: JobStore,
    executors: ExecutorRegistry,
}

/// What remains to be done after a pass, used by pollers to decide whether
/// and how long to wait.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueOutlook {
    /// Jobs in `pending`, `queued` or `running`.
    pub active: usize,
    /// Jobs parked behind an open breaker.
    pub circuit_blocked: usize,
    /// Earliest scheduled retry among queued jobs.
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl QueueOutlook {
    /// Nothing is running and nothing can start.
    pub fn is_idle(&self) -> bool {
        self.active == 0 && self.circuit_blocked == 0
    }
}

/// Dependency-aware job queue.
///
/// Owns the job store, the executor registry and one circuit breaker per
/// executor. Callers add jobs, register executors and drive the queue by
/// calling [`process_queue`](Self::process_queue) until it drains.
///
/// Scheduling passes never overlap: a second concurrent call waits for the
/// first to finish.
pub struct JobQueue {
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<QueueState>,
    pass_guard: Mutex<()>,
    breakers: CircuitBreakerRegistry,
    scheduler: Scheduler,
    engine: ExecutionEngine,
    events: EventBus,
    audit: Arc<dyn AuditSink>,
    metrics_sink: Arc<dyn MetricsSink>,
}

impl JobQueue {
    /// Create a queue on the system clock with no-op sinks.
    pub fn new(config: QueueConfig) -> MaestroResult<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Ok(Self {
            breakers: CircuitBreakerRegistry::new(config.circuit_breaker.clone(), clock.clone()),
            scheduler: Scheduler::new(config.max_concurrent),
            engine: ExecutionEngine::new(config.retry.clone(), config.default_timeout()),
            clock,
            state: RwLock::new(QueueState {
                jobs: JobStore::new(),
                executors: ExecutorRegistry::new(),
            }),
            pass_guard: Mutex::new(()),
            events: EventBus::new(),
            audit: Arc::new(NoopAuditSink),
            metrics_sink: Arc::new(NoopMetricsSink),
            config,
        })
    }

    /// Swap the time source. Breakers are rebuilt in `closed` for every
    /// executor registered so far.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.breakers = CircuitBreakerRegistry::new(self.config.circuit_breaker.clone(), clock.clone());
        for id in self.state.get_mut().executors.ids() {
            self.breakers.register(&id);
        }
        self.clock = clock;
        self
    }

    /// Send lifecycle records to `audit`.
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Send counters and timings to `metrics`.
    pub fn with_metrics_sink(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics_sink = metrics;
        self
    }

    /// Settings the queue was built with.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Clock used for all timestamps.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Bus carrying queue events.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Receive every lifecycle event emitted from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Per-executor circuit breakers.
    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    /// State of the breaker for `executor_id`.
    pub fn breaker_state(&self, executor_id: &str) -> CircuitState {
        self.breakers.state(executor_id)
    }

    /// Register (or replace) an executor and reset its breaker to `closed`.
    pub async fn register_executor(
        &self,
        id: impl Into<String>,
        executor: Arc<dyn Executor>,
        timeout: Option<Duration>,
    ) {
        let id = id.into();
        self.state
            .write()
            .await
            .executors
            .register(id.clone(), executor, timeout);
        self.breakers.register(&id);
        info!(executor_id = %id, timeout_ms = ?timeout.map(|t| t.as_millis()), "Executor registered");
    }

    /// Register an async closure as an executor.
    pub async fn register_fn<F, Fut>(&self, id: impl Into<String>, f: F, timeout: Option<Duration>)
    where
        F: Fn(Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MaestroResult<serde_json::Value>> + Send + 'static,
    {
        self.register_executor(id, Arc::new(FnExecutor::new(f)), timeout)
            .await;
    }

    /// Ids of all registered executors.
    pub async fn executor_ids(&self) -> Vec<String> {
        self.state.read().await.executors.ids()
    }

    /// Add a job in `pending`.
    ///
    /// Every dependency must already be known to the queue, which also
    /// keeps the job set acyclic.
    pub async fn add_task(&self, new: NewJob) -> MaestroResult<Uuid> {
        if new.name.trim().is_empty() {
            return Err(MaestroError::Queue("job name must not be empty".to_string()));
        }
        if new.executor_id.trim().is_empty() {
            return Err(MaestroError::Queue(format!(
                "job '{}' has no executor id",
                new.name
            )));
        }
        if new.max_attempts == 0 {
            return Err(MaestroError::Queue(format!(
                "job '{}' must allow at least one attempt",
                new.name
            )));
        }

        let now = self.clock.now();
        let job = {
            let mut state = self.state.write().await;
            if let Some(missing) = new.depends_on.iter().find(|d| !state.jobs.contains(**d)) {
                return Err(MaestroError::Queue(format!(
                    "job '{}' depends on unknown job {missing}",
                    new.name
                )));
            }

            let mut depends_on = Vec::with_capacity(new.depends_on.len());
            for dep in new.depends_on {
                if !depends_on.contains(&dep) {
                    depends_on.push(dep);
                }
            }

            let seq = state.jobs.next_seq();
            let job = Job {
                id: Uuid::new_v4(),
                seq,
                name: new.name,
                description: new.description,
                priority: new.priority,
                status: JobStatus::Pending,
                depends_on,
                payload: new.payload,
                executor_id: new.executor_id,
                max_attempts: new.max_attempts,
                current_attempt: 0,
                next_attempt_at: None,
                created_at: now,
                started_at: None,
                completed_at: None,
                result: None,
                error: None,
                blocked_reason: None,
                metadata: new.metadata,
            };
            state.jobs.insert(job.clone());
            job
        };

        info!(
            job_id = %job.id,
            name = %job.name,
            executor_id = %job.executor_id,
            priority = %job.priority,
            "Job added"
        );
        self.events.emit(
            QueueEvent::new(EventType::TaskAdded, now)
                .with_job(job.id)
                .with_executor(job.executor_id.clone())
                .with_metadata(json!({
                    "name": job.name,
                    "priority": job.priority,
                    "dependsOn": job.depends_on,
                })),
        );
        self.write_audit(
            AuditRecord::new(
                AuditKind::Task,
                job.id.to_string(),
                format!("Job '{}' added for executor '{}'", job.name, job.executor_id),
                now,
            )
            .with_details(json!({
                "name": job.name,
                "description": job.description,
                "priority": job.priority,
                "executorId": job.executor_id,
                "dependsOn": job.depends_on,
                "maxAttempts": job.max_attempts,
            })),
        )
        .await;
        self.count("taskqueue.task_added");
        Ok(job.id)
    }

    /// Run one scheduling pass and return the resulting metrics.
    ///
    /// Job-level failures are recorded on the jobs and announced as
    /// events; they never surface as errors here.
    pub async fn process_queue(&self) -> QueueMetrics {
        let _pass = self.pass_guard.lock().await;

        for transition in self.breakers.refresh() {
            self.announce_circuit(&transition);
        }

        let now = self.clock.now();
        let (plan, batch, blocked_jobs) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;
            let plan = self.scheduler.plan(&mut state.jobs, &self.breakers, now);

            let mut batch = Vec::with_capacity(plan.selected.len());
            for id in &plan.selected {
                if let Some(job) = state.jobs.get_mut(*id) {
                    job.status = JobStatus::Running;
                    job.started_at = Some(now);
                    job.completed_at = None;
                    let executor = state.executors.get(&job.executor_id).cloned();
                    batch.push((job.clone(), executor));
                }
            }
            let blocked_jobs: Vec<(Job, BlockReason)> = plan
                .blocked
                .iter()
                .filter_map(|(id, reason)| state.jobs.get(*id).map(|j| (j.clone(), reason.clone())))
                .collect();
            (plan, batch, blocked_jobs)
        };

        for id in &plan.released {
            debug!(job_id = %id, "Job released from circuit block");
        }
        for (job, reason) in &blocked_jobs {
            self.announce_blocked(job, reason, now).await;
        }
        for (job, _) in &batch {
            debug!(job_id = %job.id, attempt = job.current_attempt + 1, "Job started");
            self.events.emit(
                QueueEvent::new(EventType::TaskStarted, now)
                    .with_job(job.id)
                    .with_executor(job.executor_id.clone())
                    .with_metadata(json!({ "attempt": job.current_attempt + 1 })),
            );
            self.audit_status(job, "running", now).await;
        }

        let engine = &self.engine;
        let mut in_flight: FuturesUnordered<_> = batch
            .into_iter()
            .map(|(job, executor)| async move {
                let id = job.id;
                let executor_id = job.executor_id.clone();
                let outcome = engine.run(executor, job).await;
                (id, executor_id, outcome)
            })
            .collect();

        while let Some((id, executor_id, outcome)) = in_flight.next().await {
            self.settle(id, &executor_id, outcome).await;
        }

        let metrics = self.metrics().await;
        self.events.emit(
            QueueEvent::new(EventType::QueueProcessed, self.clock.now())
                .with_metadata(serde_json::to_value(&metrics).unwrap_or_default()),
        );
        debug!(
            total = metrics.total_jobs,
            completed = metrics.completed,
            failed = metrics.failed,
            blocked = metrics.blocked,
            "Queue pass finished"
        );
        metrics
    }

    /// Apply one finished attempt: job state first, then the breaker.
    async fn settle(&self, id: Uuid, executor_id: &str, outcome: AttemptOutcome) {
        let now = self.clock.now();
        let breaker_verdict = match &outcome {
            AttemptOutcome::Success(_) => Some(true),
            AttemptOutcome::Failure {
                code: JobErrorCode::UnknownExecutor,
                ..
            } => None,
            AttemptOutcome::Failure { .. } => Some(false),
        };

        let (transition, job) = {
            let mut state = self.state.write().await;
            let Some(job) = state.jobs.get_mut(id) else {
                warn!(job_id = %id, "Finished job vanished from the store");
                return;
            };
            let transition = self.engine.apply(job, outcome, now);
            (transition, job.clone())
        };
        if transition == Transition::Ignored {
            return;
        }

        let circuit = match breaker_verdict {
            Some(true) => self.breakers.record_success(executor_id),
            Some(false) => self.breakers.record_failure(executor_id),
            None => None,
        };

        let error_message = job.error.as_ref().map(|e| e.message.clone());
        match transition {
            Transition::Completed { duration_ms } => {
                info!(job_id = %id, executor_id, duration_ms, "Job completed");
                self.events.emit(
                    QueueEvent::new(EventType::TaskCompleted, now)
                        .with_job(id)
                        .with_executor(executor_id)
                        .with_metadata(json!({ "durationMs": duration_ms })),
                );
                self.audit_status(&job, "completed", now).await;
                self.count("taskqueue.task_completed");
                if let Err(e) = self.metrics_sink.timing("taskqueue.execution_time_ms", duration_ms) {
                    warn!(error = %e, "Metrics sink rejected timing");
                }
            }
            Transition::Retry {
                attempt,
                delay_ms,
                next_attempt_at,
            } => {
                warn!(
                    job_id = %id,
                    executor_id,
                    attempt,
                    max_attempts = job.max_attempts,
                    delay_ms,
                    error = error_message.as_deref().unwrap_or_default(),
                    "Job failed, retry scheduled"
                );
                self.events.emit(
                    QueueEvent::new(EventType::TaskRetry, now)
                        .with_job(id)
                        .with_executor(executor_id)
                        .with_metadata(json!({
                            "attempt": attempt,
                            "delayMs": delay_ms,
                            "nextAttemptAt": next_attempt_at,
                            "error": error_message,
                        })),
                );
                self.audit_status(&job, "queued", now).await;
                self.count("taskqueue.task_retry");
            }
            Transition::Failed { attempt, code } => {
                error!(
                    job_id = %id,
                    executor_id,
                    attempt,
                    code = %code,
                    error = error_message.as_deref().unwrap_or_default(),
                    "Job failed permanently"
                );
                self.events.emit(
                    QueueEvent::new(EventType::TaskFailed, now)
                        .with_job(id)
                        .with_executor(executor_id)
                        .with_metadata(json!({
                            "attempt": attempt,
                            "code": code,
                            "error": error_message,
                        })),
                );
                self.audit_status(&job, "failed", now).await;
                self.count("taskqueue.task_failed");
            }
            Transition::Ignored => {}
        }

        if let Some(transition) = circuit {
            self.announce_circuit(&transition);
        }
    }

    async fn announce_blocked(&self, job: &Job, reason: &BlockReason, now: DateTime<Utc>) {
        warn!(
            job_id = %job.id,
            executor_id = %job.executor_id,
            reason = reason.code(),
            "Job blocked"
        );
        self.events.emit(
            QueueEvent::new(EventType::TaskBlocked, now)
                .with_job(job.id)
                .with_executor(job.executor_id.clone())
                .with_metadata(json!({ "reason": reason })),
        );
        self.audit_status(job, "blocked", now).await;
        self.count("taskqueue.task_blocked");
    }

    fn announce_circuit(&self, transition: &CircuitTransition) {
        let event_type = match transition.to {
            CircuitState::Open => EventType::CircuitOpened,
            CircuitState::Closed => EventType::CircuitClosed,
            CircuitState::HalfOpen => {
                debug!(executor_id = %transition.executor_id, "Circuit half-open, probing");
                return;
            }
        };
        self.events.emit(
            QueueEvent::new(event_type, self.clock.now())
                .with_executor(transition.executor_id.clone())
                .with_metadata(json!({
                    "from": transition.from,
                    "failureCount": transition.failure_count,
                })),
        );
        if event_type == EventType::CircuitOpened {
            self.count("taskqueue.circuit_opened");
        }
    }

    async fn audit_status(&self, job: &Job, status: &str, now: DateTime<Utc>) {
        self.write_audit(
            AuditRecord::new(
                AuditKind::Status,
                job.id.to_string(),
                format!("Job '{}' is now {status}", job.name),
                now,
            )
            .with_details(json!({
                "status": status,
                "executorId": job.executor_id,
                "attempt": job.current_attempt,
                "maxAttempts": job.max_attempts,
                "blockedReason": job.blocked_reason,
                "error": job.error,
            })),
        )
        .await;
    }

    async fn write_audit(&self, record: AuditRecord) {
        let kind = record.kind;
        if let Err(e) = self.audit.record(record).await {
            warn!(kind = %kind, error = %e, "Audit write failed");
        }
    }

    fn count(&self, name: &str) {
        if let Err(e) = self.metrics_sink.increment(name, 1) {
            warn!(metric = name, error = %e, "Metrics sink rejected counter");
        }
    }

    /// Snapshot of one job.
    pub async fn get_job(&self, id: Uuid) -> Option<Job> {
        self.state.read().await.jobs.get(id).cloned()
    }

    /// Every job, in creation order.
    pub async fn get_all_jobs(&self) -> Vec<Job> {
        self.state.read().await.jobs.iter().cloned().collect()
    }

    /// Counts per status.
    pub async fn metrics(&self) -> QueueMetrics {
        QueueMetrics::from_jobs(self.state.read().await.jobs.iter())
    }

    /// Counts plus what blocks progress.
    pub async fn outlook(&self) -> QueueOutlook {
        let state = self.state.read().await;
        let mut outlook = QueueOutlook::default();
        for job in state.jobs.iter() {
            match job.status {
                JobStatus::Pending | JobStatus::Queued | JobStatus::Running => outlook.active += 1,
                JobStatus::Blocked if !job.is_permanently_blocked() => {
                    outlook.circuit_blocked += 1
                }
                _ => {}
            }
            if job.status == JobStatus::Queued {
                if let Some(at) = job.next_attempt_at {
                    outlook.next_retry_at = Some(outlook.next_retry_at.map_or(at, |cur| cur.min(at)));
                }
            }
        }
        outlook
    }

    /// Remove completed, failed and dependency-blocked jobs. A terminal job
    /// still named as a dependency by a remaining job is kept.
    pub async fn clear_terminal_jobs(&self) -> usize {
        let _pass = self.pass_guard.lock().await;
        let mut state = self.state.write().await;

        let removable = |job: &Job| job.status.is_terminal() || job.is_permanently_blocked();
        let referenced: HashSet<Uuid> = state
            .jobs
            .iter()
            .filter(|j| !removable(j))
            .flat_map(|j| j.depends_on.iter().copied())
            .collect();

        let removed = state
            .jobs
            .retain(|job| !removable(job) || referenced.contains(&job.id));
        info!(removed, remaining = state.jobs.len(), "Terminal jobs cleared");
        removed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use maestro_core::ManualClock;

    async fn queue() -> (JobQueue, ManualClock) {
        let clock = ManualClock::new();
        let queue = JobQueue::new(QueueConfig::default())
            .unwrap()
            .with_clock(Arc::new(clock.clone()));
        queue
            .register_fn("ok", |job: Job| async move { Ok(job.payload) }, None)
            .await;
        (queue, clock)
    }

    #[tokio::test]
    async fn test_add_task_rejects_bad_input() {
        let (queue, _) = queue().await;
        assert!(queue.add_task(NewJob::new("", "ok")).await.is_err());
        assert!(queue.add_task(NewJob::new("a", " ")).await.is_err());
        assert!(queue
            .add_task(NewJob::new("a", "ok").with_max_attempts(0))
            .await
            .is_err());
        let err = queue
            .add_task(NewJob::new("a", "ok").with_dependencies(vec![Uuid::new_v4()]))
            .await
            .unwrap_err();
        assert!(matches!(err, MaestroError::Queue(_)));
        assert!(queue.get_all_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_add_task_dedupes_dependencies() {
        let (queue, _) = queue().await;
        let a = queue.add_task(NewJob::new("a", "ok")).await.unwrap();
        let b = queue
            .add_task(NewJob::new("b", "ok").with_dependencies(vec![a, a]))
            .await
            .unwrap();
        let job = queue.get_job(b).await.unwrap();
        assert_eq!(job.depends_on, vec![a]);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.current_attempt, 0);
    }

    #[tokio::test]
    async fn test_single_pass_completes_job() {
        let (queue, _) = queue().await;
        let id = queue
            .add_task(NewJob::new("echo", "ok").with_payload(json!({"v": 7})))
            .await
            .unwrap();
        let metrics = queue.process_queue().await;
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.success_rate_pct, 100.0);
        let job = queue.get_job(id).await.unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result, Some(json!({"v": 7})));
    }

    #[tokio::test]
    async fn test_with_clock_keeps_registered_breakers() {
        let queue = JobQueue::new(QueueConfig::default()).unwrap();
        queue
            .register_fn("ok", |_job: Job| async { Ok(serde_json::Value::Null) }, None)
            .await;
        let queue = queue.with_clock(Arc::new(ManualClock::new()));
        assert!(queue.breakers().contains("ok"));
    }

    #[tokio::test]
    async fn test_clear_keeps_referenced_terminal_jobs() {
        let (queue, _) = queue().await;
        queue
            .register_fn(
                "failing",
                |_job: Job| async {
                    Err::<serde_json::Value, _>(MaestroError::Executor("later".into()))
                },
                None,
            )
            .await;
        let a = queue.add_task(NewJob::new("a", "ok")).await.unwrap();
        let b = queue
            .add_task(NewJob::new("b", "failing").with_dependencies(vec![a]))
            .await
            .unwrap();
        let lone = queue.add_task(NewJob::new("lone", "ok")).await.unwrap();

        queue.process_queue().await;
        assert_eq!(queue.get_job(a).await.unwrap().status, JobStatus::Completed);

        let removed = queue.clear_terminal_jobs().await;
        assert_eq!(removed, 1);
        assert!(queue.get_job(lone).await.is_none());
        assert!(queue.get_job(a).await.is_some());
        assert!(queue.get_job(b).await.is_some());
    }

    #[tokio::test]
    async fn test_outlook_reports_next_retry() {
        let (queue, clock) = queue().await;
        queue
            .register_fn(
                "flaky",
                |_job: Job| async {
                    Err::<serde_json::Value, _>(MaestroError::Executor("nope".into()))
                },
                None,
            )
            .await;
        queue.add_task(NewJob::new("f", "flaky")).await.unwrap();
        queue.process_queue().await;

        let outlook = queue.outlook().await;
        assert_eq!(outlook.active, 1);
        assert!(!outlook.is_idle());
        assert_eq!(
            outlook.next_retry_at,
            Some(clock.now() + chrono::Duration::milliseconds(2_000))
        );
    }
}
