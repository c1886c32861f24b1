use crate::types::Job;
use async_trait::async_trait;
use maestro_core::MaestroResult;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Performs the work of a job.
///
/// An executor receives its own snapshot of the job and returns an opaque
/// result. It never touches queue state directly.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run one attempt of `job` and return its result.
    async fn execute(&self, job: Job) -> MaestroResult<serde_json::Value>;
}

/// Adapts an async closure into an [`Executor`].
pub struct FnExecutor<F> {
    f: F,
}

impl<F> FnExecutor<F> {
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> Executor for FnExecutor<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = MaestroResult<serde_json::Value>> + Send + 'static,
{
    async fn execute(&self, job: Job) -> MaestroResult<serde_json::Value> {
        (self.f)(job).await
    }
}

/// An executor plus its optional deadline override.
#[derive(Clone)]
pub struct RegisteredExecutor {
    /// The executor itself.
    pub executor: Arc<dyn Executor>,
    /// Per-executor timeout; the queue default applies when unset.
    pub timeout: Option<Duration>,
}

/// Executors keyed by id.
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<String, RegisteredExecutor>,
}

impl ExecutorRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace an executor.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        executor: Arc<dyn Executor>,
        timeout: Option<Duration>,
    ) {
        self.executors
            .insert(id.into(), RegisteredExecutor { executor, timeout });
    }

    /// Look up an executor.
    pub fn get(&self, id: &str) -> Option<&RegisteredExecutor> {
        self.executors.get(id)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.executors.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.executors.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of registered executors.
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}
