//! Turns prefetch requests into background jobs.
//!
//! Each job fetches its files one at a time, in request order. A file is
//! fetched once and then copied into every project; only after all copies
//! succeed does the job's `downloaded_files` advance. The first failing
//! file marks the job failed and the remaining files are skipped.

use tokio::task::{JoinError, JoinHandle};
use tracing::{Instrument, error, info, info_span};

use crate::context::AppContext;
use crate::core::models::{JobStatus, JobUpdate, PrefetchRequest};
use crate::error::{JobError, ValidationError};

pub struct Orchestrator {
    ctx: AppContext,
}

/// A started job: its id plus the task driving it.
///
/// Dropping the handle detaches the task; the job keeps running and is
/// observed only through the job store.
pub struct JobHandle {
    job_id: String,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.job_id
    }

    /// Wait for the job to reach a terminal state.
    pub async fn wait(self) -> Result<(), JoinError> {
        self.task.await
    }

    pub fn detach(self) -> String {
        self.job_id
    }
}

impl Orchestrator {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Validate `request`, register a pending job and spawn its worker.
    ///
    /// Returns as soon as the job record exists. Invalid requests create
    /// no job.
    pub async fn start(&self, request: PrefetchRequest) -> Result<JobHandle, ValidationError> {
        request.validate()?;

        let job_id = self.ctx.jobs.create(request.files.len() as u64).await;
        let span = info_span!(
            "prefetch_job",
            job_id = %job_id,
            repo_id = %request.repository_id,
            revision = %request.revision()
        );

        let ctx = self.ctx.clone();
        let worker_id = job_id.clone();
        let task = tokio::spawn(async move { run_job(ctx, worker_id, request).await }.instrument(span));

        Ok(JobHandle { job_id, task })
    }
}

async fn run_job(ctx: AppContext, job_id: String, request: PrefetchRequest) {
    ctx.jobs
        .update(&job_id, JobUpdate::status(JobStatus::Running))
        .await;
    info!(
        total_files = request.files.len(),
        projects = request.project_names.len(),
        "Prefetch started"
    );

    match execute(&ctx, &job_id, &request).await {
        Ok(()) => {
            ctx.jobs.update(&job_id, JobUpdate::completed()).await;
            info!("Prefetch complete");
        }
        Err(e) => {
            let message = e.to_string();
            error!(error = %message, "Prefetch failed");
            ctx.jobs.update(&job_id, JobUpdate::failed(message)).await;
        }
    }
}

async fn execute(ctx: &AppContext, job_id: &str, request: &PrefetchRequest) -> Result<(), JobError> {
    let repo_id = request.repository_id.as_str();
    let revision = request.revision();
    let total = request.files.len();

    for (index, path) in request.files.iter().enumerate() {
        let cached = ctx
            .hub
            .fetcher
            .fetch(repo_id, revision, path)
            .await
            .map_err(|source| JobError::Fetch {
                path: path.clone(),
                source,
            })?;

        ctx.distributor
            .distribute(&cached, path, repo_id, &request.project_names)
            .await
            .map_err(|source| JobError::Distribute {
                path: path.clone(),
                source,
            })?;

        ctx.jobs.update(job_id, JobUpdate::file_done()).await;
        info!(file = %path, done = index + 1, total, "File prefetched");
    }

    Ok(())
}
