use crate::matcher::{CapabilityMatcher, WorkerCandidate};
use crate::parser::SpecParser;
use crate::types::{SpecTask, Specification};
use crate::validator::{SpecValidator, ValidationError};
use maestro_core::{
    AuditKind, AuditRecord, AuditSink, EventType, MaestroResult, MetricsSink, NoopAuditSink,
    NoopMetricsSink, QueueEvent,
};
use maestro_orchestrator::{DependencyGraph, JobQueue, NewJob};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Knobs for turning tasks into jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Attempt budget given to every job.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Matches below this confidence are treated as no match.
    #[serde(default)]
    pub min_confidence: f64,
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            min_confidence: 0.0,
        }
    }
}

/// A task that became a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskAssignment {
    /// Task id from the specification.
    pub task_id: String,
    /// Job created for the task.
    pub job_id: Uuid,
    /// Worker chosen for the task.
    pub worker_id: String,
    /// Match score in `[0, 1]`.
    pub confidence: f64,
}

/// Report of one compilation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompilationResult {
    /// Id of the compiled specification.
    pub spec_id: String,
    /// Jobs added to the queue.
    pub tasks_created: usize,
    /// Distinct workers that received at least one job.
    pub workers_assigned: usize,
    /// Created jobs in creation order.
    pub job_ids: Vec<Uuid>,
    /// One entry per created job.
    pub assignments: Vec<TaskAssignment>,
    /// Sum of all task efforts, without credit for parallel work.
    pub estimated_duration_days: f64,
    /// Problems that did not stop compilation.
    pub warnings: Vec<String>,
    /// Problems that did; no jobs were created.
    pub errors: Vec<String>,
}

impl CompilationResult {
    /// No errors were reported.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Compiles specifications into jobs on a [`JobQueue`].
pub struct SpecCompiler {
    queue: Arc<JobQueue>,
    matcher: Arc<dyn CapabilityMatcher>,
    workers: Vec<WorkerCandidate>,
    parser: SpecParser,
    validator: SpecValidator,
    config: CompilerConfig,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<dyn MetricsSink>,
}

impl SpecCompiler {
    /// Compiler feeding `queue`, matching tasks against `candidates`.
    pub fn new(
        queue: Arc<JobQueue>,
        matcher: Arc<dyn CapabilityMatcher>,
        workers: Vec<WorkerCandidate>,
    ) -> Self {
        Self {
            queue,
            matcher,
            workers,
            parser: SpecParser::default(),
            validator: SpecValidator::default(),
            config: CompilerConfig::default(),
            audit: Arc::new(NoopAuditSink),
            metrics: Arc::new(NoopMetricsSink),
        }
    }

    /// Replace the compiler settings.
    pub fn with_config(mut self, config: CompilerConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the parser.
    pub fn with_parser(mut self, parser: SpecParser) -> Self {
        self.parser = parser;
        self
    }

    /// Replace the validator.
    pub fn with_validator(mut self, validator: SpecValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Send compilation records to `audit`.
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Send compilation metrics to `metrics`.
    pub fn with_metrics_sink(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Queue the compiler feeds.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Parse, validate and compile a document. Parse warnings are carried
    /// into the result.
    pub async fn compile_from_text(&self, text: &str) -> MaestroResult<CompilationResult> {
        let outcome = self.parser.parse(text)?;
        let mut warnings: Vec<String> = outcome.warnings.iter().map(ToString::to_string).collect();
        let mut result = self.compile(&outcome.specification).await?;
        warnings.append(&mut result.warnings);
        result.warnings = warnings;
        Ok(result)
    }

    /// Validation problems for a parsed specification.
    pub fn validate(&self, spec: &Specification) -> Vec<ValidationError> {
        self.validator.validate(spec)
    }

    /// Turn every task into a job, dependencies first.
    ///
    /// Validation errors abort before any job is created and are returned
    /// in [`CompilationResult::errors`]. A task without a matching worker is
    /// skipped with a warning, and so is every task depending on it.
    pub async fn compile(&self, spec: &Specification) -> MaestroResult<CompilationResult> {
        let mut result = CompilationResult {
            spec_id: spec.metadata.id.clone(),
            estimated_duration_days: spec.estimated_duration_days(),
            ..CompilationResult::default()
        };

        let errors = self.validator.validate(spec);
        if !errors.is_empty() {
            result.errors = errors.iter().map(ToString::to_string).collect();
            warn!(
                spec_id = %spec.metadata.id,
                errors = result.errors.len(),
                "Specification failed validation, no jobs created"
            );
            self.finish(spec, &result).await;
            return Ok(result);
        }

        let graph = DependencyGraph::build(
            spec.tasks
                .iter()
                .map(|t| (t.id.clone(), t.dependencies.iter().cloned())),
        );
        let order = graph.topological_order()?;
        let tasks: HashMap<&str, &SpecTask> =
            spec.tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        let mut jobs_by_task: HashMap<String, Uuid> = HashMap::new();
        let mut skipped: HashSet<String> = HashSet::new();
        let mut workers: HashSet<String> = HashSet::new();

        for task_id in order {
            let Some(task) = tasks.get(task_id.as_str()).copied() else {
                continue;
            };

            if let Some(dep) = task.dependencies.iter().find(|d| skipped.contains(*d)) {
                result.warnings.push(format!(
                    "{}: skipped because dependency {dep} was skipped",
                    task.id
                ));
                skipped.insert(task.id.clone());
                continue;
            }

            let request = task
                .preferred_worker
                .clone()
                .unwrap_or_else(|| format!("{} {}", task.name, task.description));
            let matched = match self.matcher.best_match(&request, &self.workers).await {
                Ok(m) => m.filter(|m| m.confidence >= self.config.min_confidence),
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Capability matcher unavailable");
                    result
                        .warnings
                        .push(format!("{}: matcher unavailable ({e})", task.id));
                    skipped.insert(task.id.clone());
                    continue;
                }
            };
            let Some(matched) = matched else {
                let mut message = format!("{}: no worker matches '{request}'", task.id);
                if let Some(fallback) = &task.fallback {
                    message.push_str(&format!("; fallback: {fallback}"));
                }
                result.warnings.push(message);
                skipped.insert(task.id.clone());
                continue;
            };

            let depends_on = task
                .dependencies
                .iter()
                .filter_map(|d| jobs_by_task.get(d).copied())
                .collect();
            let new_job = NewJob::new(task.name.clone(), matched.worker_id.clone())
                .with_description(task.description.clone())
                .with_priority(spec.metadata.priority)
                .with_dependencies(depends_on)
                .with_max_attempts(self.config.max_attempts)
                .with_payload(json!({
                    "specId": spec.metadata.id,
                    "taskId": task.id,
                    "description": task.description,
                    "inputs": task.inputs,
                    "outputs": task.outputs,
                    "acceptanceCriteria": task.acceptance_criteria,
                }))
                .with_metadata("spec_id", json!(spec.metadata.id))
                .with_metadata("task_id", json!(task.id))
                .with_metadata("fallback", json!(task.fallback));

            let job_id = match self.queue.add_task(new_job).await {
                Ok(id) => id,
                Err(e) => {
                    result.warnings.push(format!("{}: job rejected ({e})", task.id));
                    skipped.insert(task.id.clone());
                    continue;
                }
            };

            self.queue.events().emit(
                QueueEvent::new(EventType::TaskCompiled, self.queue.clock().now())
                    .with_job(job_id)
                    .with_executor(matched.worker_id.clone())
                    .with_metadata(json!({
                        "specId": spec.metadata.id,
                        "taskId": task.id,
                        "confidence": matched.confidence,
                    })),
            );
            info!(
                task_id = %task.id,
                job_id = %job_id,
                worker_id = %matched.worker_id,
                confidence = matched.confidence,
                "Task compiled"
            );

            jobs_by_task.insert(task.id.clone(), job_id);
            workers.insert(matched.worker_id.clone());
            result.job_ids.push(job_id);
            result.assignments.push(TaskAssignment {
                task_id: task.id.clone(),
                job_id,
                worker_id: matched.worker_id,
                confidence: matched.confidence,
            });
        }

        result.tasks_created = result.job_ids.len();
        result.workers_assigned = workers.len();
        info!(
            spec_id = %spec.metadata.id,
            tasks_created = result.tasks_created,
            workers_assigned = result.workers_assigned,
            warnings = result.warnings.len(),
            estimated_days = result.estimated_duration_days,
            "Specification compiled"
        );
        self.finish(spec, &result).await;
        Ok(result)
    }

    async fn finish(&self, spec: &Specification, result: &CompilationResult) {
        let summary = if result.is_success() {
            format!(
                "Compiled '{}' into {} job(s)",
                spec.metadata.id, result.tasks_created
            )
        } else {
            format!(
                "Rejected '{}' with {} validation error(s)",
                spec.metadata.id,
                result.errors.len()
            )
        };
        let record = AuditRecord::new(
            AuditKind::Compilation,
            spec.metadata.id.clone(),
            summary,
            self.queue.clock().now(),
        )
        .with_details(json!({
            "version": spec.metadata.version,
            "domain": spec.metadata.domain,
            "lineage": spec.metadata.lineage,
            "result": result,
        }));
        if let Err(e) = self.audit.record(record).await {
            warn!(spec_id = %spec.metadata.id, error = %e, "Audit write failed");
        }

        let name = if result.is_success() {
            "gma.compilations"
        } else {
            "gma.compilations_rejected"
        };
        let counts = [
            (name, 1),
            ("gma.tasks_compiled", result.tasks_created as u64),
        ];
        for (metric, value) in counts {
            if let Err(e) = self.metrics.increment(metric, value) {
                warn!(metric, error = %e, "Metrics sink rejected counter");
            }
        }
    }
}
