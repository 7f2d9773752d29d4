//! Request handlers for the `/api` routes.

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::{Deserialize, Serialize};

use super::WebState;
use crate::core::models::{FileEntry, PrefetchRequest, is_valid_repo_id, is_valid_revision};
use crate::core::reporter::{self, StatusView};
use crate::error::{ApiError, ValidationError};

#[derive(Debug, Deserialize)]
pub struct ModelFilesQuery {
    repo_id: String,
    #[serde(default)]
    revision: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelFilesResponse {
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PrefetchResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobsResponse {
    pub jobs: Vec<StatusView>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub version: String,
    pub uptime_secs: u64,
    pub active_jobs: usize,
    pub simulation: bool,
}

/// List the files of a remote repository. No job state is touched.
pub async fn list_model_files(
    State(state): State<WebState>,
    Query(query): Query<ModelFilesQuery>,
) -> Result<Json<ModelFilesResponse>, ApiError> {
    if query.repo_id.trim().is_empty() {
        return Err(ValidationError::MissingRepoId.into());
    }
    if !is_valid_repo_id(&query.repo_id) {
        return Err(ValidationError::InvalidRepoId(query.repo_id).into());
    }
    if !is_valid_revision(query.revision.as_deref()) {
        return Err(ValidationError::InvalidRevision(query.revision.unwrap_or_default()).into());
    }

    let files = state
        .ctx
        .hub
        .listing
        .list_files(&query.repo_id, query.revision.as_deref())
        .await
        .map_err(|source| ApiError::RemoteLookup {
            repo_id: query.repo_id.clone(),
            source,
        })?;

    Ok(Json(ModelFilesResponse { files }))
}

/// Start a prefetch job and return its id without waiting for it.
pub async fn start_prefetch(
    State(state): State<WebState>,
    Json(request): Json<PrefetchRequest>,
) -> Result<Json<PrefetchResponse>, ApiError> {
    let repo_id = request.repository_id.clone();
    let handle = state.orchestrator.start(request).await?;
    let job_id = handle.detach();

    tracing::info!(job_id = %job_id, repo_id = %repo_id, "Prefetch job accepted");
    Ok(Json(PrefetchResponse { job_id }))
}

pub async fn job_status(
    State(state): State<WebState>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusView>, ApiError> {
    reporter::report(&state.ctx.jobs, &job_id)
        .await
        .map(Json)
        .ok_or(ApiError::JobNotFound)
}

pub async fn list_jobs(State(state): State<WebState>) -> Json<JobsResponse> {
    let jobs = reporter::report_all(&state.ctx.jobs).await;
    let count = jobs.len();
    Json(JobsResponse { jobs, count })
}

pub async fn health(State(state): State<WebState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        active_jobs: state.ctx.jobs.active_count().await,
        simulation: state.ctx.config.simulation,
    })
}
