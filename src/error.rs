//! Error taxonomy for prefetch requests and job execution.
//!
//! Request-shape and listing errors are returned synchronously to HTTP
//! callers through [`ApiError`]. Errors raised while a job runs
//! ([`JobError`]) never reach a caller; they are recorded on the job.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io;
use std::path::PathBuf;

/// A prefetch request that must be rejected before any job exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("repo_id required")]
    MissingRepoId,
    #[error("invalid repo_id '{0}': expected 'name' or 'namespace/name'")]
    InvalidRepoId(String),
    #[error("invalid revision '{0}'")]
    InvalidRevision(String),
    #[error("At least one project name required")]
    NoProjects,
    #[error("invalid project name '{0}'")]
    InvalidProjectName(String),
    #[error("At least one file to prefetch required")]
    NoFiles,
    #[error("invalid file path '{0}': must be relative and stay inside the repository")]
    InvalidFilePath(String),
}

/// Failures talking to the remote hub, for listing as well as fetching.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("access denied: {0}")]
    Unauthorized(String),
    #[error("hub returned {status} for {url}")]
    Upstream { status: u16, url: String },
    #[error("request to hub failed: {0}")]
    Transport(String),
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<reqwest::Error> for HubError {
    fn from(e: reqwest::Error) -> Self {
        HubError::Transport(e.to_string())
    }
}

/// Failure copying a cached file into a project directory.
#[derive(Debug, thiserror::Error)]
pub enum DistributeError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("copy of {path} does not match its source")]
    VerifyMismatch { path: PathBuf },
    #[error("copy task aborted: {0}")]
    Task(String),
}

/// A single file's terminal failure inside a running job.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("failed to fetch {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: HubError,
    },
    #[error("failed to distribute {path}: {source}")]
    Distribute {
        path: String,
        #[source]
        source: DistributeError,
    },
}

/// Errors surfaced by the HTTP API, rendered as plain text.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Failed to list files for {repo_id}: {source}")]
    RemoteLookup {
        repo_id: String,
        #[source]
        source: HubError,
    },
    #[error("Job not found")]
    JobNotFound,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RemoteLookup { source, .. } => match source {
                HubError::NotFound(_) => StatusCode::NOT_FOUND,
                HubError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
                _ => StatusCode::BAD_GATEWAY,
            },
            ApiError::JobNotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(error = %self, "Request failed");
        }
        (status, self.to_string()).into_response()
    }
}
