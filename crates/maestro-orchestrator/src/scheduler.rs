use crate::circuit_breaker::CircuitBreakerRegistry;
use crate::store::JobStore;
use crate::types::{BlockReason, Job, JobStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Outcome of one scheduling pass over the job store.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassPlan {
    /// Jobs moved to `blocked` during this pass.
    pub blocked: Vec<(Uuid, BlockReason)>,
    /// Circuit-blocked jobs released because their breaker left `open`.
    pub released: Vec<Uuid>,
    /// Jobs to start now, highest priority first.
    pub selected: Vec<Uuid>,
}

/// Picks runnable jobs under the concurrency cap.
#[derive(Debug, Clone)]
pub struct Scheduler {
    max_concurrent: usize,
}

impl Scheduler {
    /// Scheduler starting at most `max_concurrent` jobs at once.
    pub fn new(max_concurrent: usize) -> Self {
        Self { max_concurrent }
    }

    /// Concurrency cap.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run one pass: release circuit blocks, propagate dependency blocks,
    /// compute the ready set and pick the jobs to start.
    ///
    /// Blocking transitions are applied to `store`; selected jobs are left
    /// untouched for the caller to start.
    pub fn plan(
        &self,
        store: &mut JobStore,
        breakers: &CircuitBreakerRegistry,
        now: DateTime<Utc>,
    ) -> PassPlan {
        let mut plan = PassPlan {
            released: Self::release_circuit_blocks(store, breakers),
            ..PassPlan::default()
        };
        plan.blocked = Self::propagate_dependency_blocks(store);

        let mut ready = Vec::new();
        for id in Self::ready_set(store, now) {
            let Some(job) = store.get_mut(id) else {
                continue;
            };
            if breakers.is_open(&job.executor_id) {
                job.status = JobStatus::Blocked;
                job.blocked_reason = Some(BlockReason::CircuitBreakerOpen);
                plan.blocked.push((id, BlockReason::CircuitBreakerOpen));
                continue;
            }
            ready.push((job.priority, job.seq, id));
        }

        // Highest priority first, creation order among equals.
        ready.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        // Zero under `JobQueue`, which settles every job before the next pass;
        // counts jobs a caller left `running` in a store planned directly.
        let running = store
            .iter()
            .filter(|j| j.status == JobStatus::Running)
            .count();
        let slots = self.max_concurrent.saturating_sub(running);
        plan.selected = ready.into_iter().take(slots).map(|(_, _, id)| id).collect();

        debug!(
            running,
            slots,
            selected = plan.selected.len(),
            blocked = plan.blocked.len(),
            released = plan.released.len(),
            "Scheduling pass planned"
        );
        plan
    }

    /// Waiting jobs whose retry delay has elapsed and whose dependencies are
    /// all `completed`, in creation order.
    pub fn ready_set(store: &JobStore, now: DateTime<Utc>) -> Vec<Uuid> {
        let completed: HashMap<Uuid, bool> = store
            .iter()
            .map(|j| (j.id, j.status == JobStatus::Completed))
            .collect();

        store
            .iter()
            .filter(|j| j.status.is_waiting())
            .filter(|j| j.next_attempt_at.map_or(true, |at| at <= now))
            .filter(|j| {
                j.depends_on
                    .iter()
                    .all(|dep| completed.get(dep).copied().unwrap_or(false))
            })
            .map(|j| j.id)
            .collect()
    }

    fn release_circuit_blocks(store: &mut JobStore, breakers: &CircuitBreakerRegistry) -> Vec<Uuid> {
        let mut released = Vec::new();
        for job in store.iter_mut() {
            if job.status != JobStatus::Blocked
                || job.blocked_reason != Some(BlockReason::CircuitBreakerOpen)
            {
                continue;
            }
            if breakers.is_open(&job.executor_id) {
                continue;
            }
            job.status = if job.current_attempt == 0 {
                JobStatus::Pending
            } else {
                JobStatus::Queued
            };
            job.blocked_reason = None;
            released.push(job.id);
        }
        released
    }

    /// Block every waiting job with a failed or dependency-blocked
    /// dependency, repeating until nothing changes so blocks travel down
    /// whole chains in one pass.
    fn propagate_dependency_blocks(store: &mut JobStore) -> Vec<(Uuid, BlockReason)> {
        let mut blocked = Vec::new();
        loop {
            let dead_ends: HashMap<Uuid, bool> =
                store.iter().map(|j| (j.id, j.is_dead_end())).collect();

            let mut changed = false;
            for job in store.iter_mut() {
                if !Self::blockable(job) {
                    continue;
                }
                let culprit = job
                    .depends_on
                    .iter()
                    .find(|dep| dead_ends.get(dep).copied().unwrap_or(false))
                    .copied();
                if let Some(dependency) = culprit {
                    let reason = BlockReason::DependencyFailed { dependency };
                    job.status = JobStatus::Blocked;
                    job.blocked_reason = Some(reason.clone());
                    blocked.push((job.id, reason));
                    changed = true;
                }
            }
            if !changed {
                return blocked;
            }
        }
    }

    fn blockable(job: &Job) -> bool {
        job.status.is_waiting()
            || (job.status == JobStatus::Blocked
                && job.blocked_reason == Some(BlockReason::CircuitBreakerOpen))
    }
}
