//! Read-only projection of job records served to pollers.

use serde::{Deserialize, Serialize};

use super::models::{Job, JobStatus};
use super::store::JobStore;

/// The externally visible shape of a job's status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub job_id: String,
    pub status: JobStatus,
    pub progress: f64,
    pub message: String,
    pub downloaded_files: u64,
    pub total_files: u64,
}

impl From<&Job> for StatusView {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            progress: job.progress(),
            message: job.message.clone(),
            downloaded_files: job.downloaded_files,
            total_files: job.total_files,
        }
    }
}

/// Current status of `job_id`, or `None` if no such job exists.
pub async fn report(store: &JobStore, job_id: &str) -> Option<StatusView> {
    store.get(job_id).await.as_ref().map(StatusView::from)
}

/// Status of every known job, newest first.
pub async fn report_all(store: &JobStore) -> Vec<StatusView> {
    store.get_all().await.iter().map(StatusView::from).collect()
}
