//! In-memory registry of prefetch jobs.
//!
//! The background worker of each job is the only writer of its record;
//! HTTP handlers read snapshots concurrently. Every update is applied
//! under the write lock, so readers only ever observe whole updates.
//! Records in a terminal state are frozen.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, warn};
use uuid::Uuid;

use super::models::{Job, JobStatus, JobUpdate};

/// Thread-safe store of job records, shared via `AppContext`.
#[derive(Clone, Default)]
pub struct JobStore {
    inner: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new pending job and return its id.
    ///
    /// The record is visible to readers as soon as this returns.
    pub async fn create(&self, total_files: u64) -> String {
        let id = Uuid::now_v7().to_string();
        let job = Job::new(id.clone(), total_files);
        let mut map = self.inner.write().await;
        map.insert(id.clone(), job);
        id
    }

    /// Apply `update` to the job atomically. Returns whether it was applied.
    ///
    /// Updates to unknown ids, to frozen (terminal) jobs, or that would move
    /// the status backwards are dropped and logged; they indicate a bug in
    /// the caller, not a user error.
    pub async fn update(&self, job_id: &str, update: JobUpdate) -> bool {
        let mut map = self.inner.write().await;

        let Some(job) = map.get_mut(job_id) else {
            error!(job_id, "Update for unknown job");
            return false;
        };

        if job.status.is_terminal() {
            warn!(job_id, status = %job.status, "Ignoring update to finished job");
            return false;
        }

        if let Some(next) = update.status {
            if !job.status.can_transition_to(next) {
                error!(job_id, from = %job.status, to = %next, "Invalid job status transition");
                return false;
            }
            job.status = next;
        }

        job.downloaded_files = job
            .downloaded_files
            .saturating_add(update.downloaded_delta)
            .min(job.total_files);

        if let Some(message) = update.message {
            job.message = message;
        }

        true
    }

    /// Snapshot of a single job.
    pub async fn get(&self, job_id: &str) -> Option<Job> {
        let map = self.inner.read().await;
        map.get(job_id).cloned()
    }

    /// Snapshots of every job, newest first.
    pub async fn get_all(&self) -> Vec<Job> {
        let map = self.inner.read().await;
        let mut jobs: Vec<Job> = map.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        jobs
    }

    /// Number of jobs still pending or running.
    pub async fn active_count(&self) -> usize {
        let map = self.inner.read().await;
        map.values().filter(|j| !j.status.is_terminal()).count()
    }
}
