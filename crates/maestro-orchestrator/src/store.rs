use crate::types::Job;
use std::collections::HashMap;
use uuid::Uuid;

/// Arena of jobs in creation order with an id index.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: Vec<Job>,
    index: HashMap<Uuid, usize>,
    next_seq: u64,
}

impl JobStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sequence number the next inserted job should carry.
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Add a job and return its id.
    pub fn insert(&mut self, job: Job) -> Uuid {
        let id = job.id;
        self.index.insert(id, self.jobs.len());
        self.jobs.push(job);
        id
    }

    /// Look up a job.
    pub fn get(&self, id: Uuid) -> Option<&Job> {
        self.index.get(&id).map(|&i| &self.jobs[i])
    }

    /// Look up a job for mutation.
    pub fn get_mut(&mut self, id: Uuid) -> Option<&mut Job> {
        match self.index.get(&id) {
            Some(&i) => self.jobs.get_mut(i),
            None => None,
        }
    }

    /// Whether `id` is stored.
    pub fn contains(&self, id: Uuid) -> bool {
        self.index.contains_key(&id)
    }

    /// Jobs in creation order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.iter()
    }

    /// Mutable iteration in creation order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Job> {
        self.jobs.iter_mut()
    }

    /// Number of jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Keep only jobs matching the predicate; returns how many were removed.
    pub fn retain<F>(&mut self, keep: F) -> usize
    where
        F: FnMut(&Job) -> bool,
    {
        let before = self.jobs.len();
        self.jobs.retain(keep);
        self.index = self
            .jobs
            .iter()
            .enumerate()
            .map(|(i, job)| (job.id, i))
            .collect();
        before - self.jobs.len()
    }
}
