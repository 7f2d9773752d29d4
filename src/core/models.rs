use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use std::sync::LazyLock;

use crate::error::ValidationError;

/// Revision used when a request names none.
pub const DEFAULT_REVISION: &str = "main";

static REPO_ID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*(/[A-Za-z0-9._-]+)?$").expect("valid repo id regex")
});

/// One remote object in a repository at a given revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    /// Size in bytes, when the hub reports one
    pub size: Option<u64>,
}

/// A selection of files to fetch once and copy into every named project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefetchRequest {
    #[serde(rename = "repo_id")]
    pub repository_id: String,
    #[serde(default)]
    pub revision: Option<String>,
    pub project_names: Vec<String>,
    pub files: Vec<String>,
}

impl PrefetchRequest {
    /// Reject requests that would create an empty or unsafe job.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.repository_id.trim().is_empty() {
            return Err(ValidationError::MissingRepoId);
        }
        if !is_valid_repo_id(&self.repository_id) {
            return Err(ValidationError::InvalidRepoId(self.repository_id.clone()));
        }
        if !is_valid_revision(self.revision.as_deref()) {
            return Err(ValidationError::InvalidRevision(
                self.revision.clone().unwrap_or_default(),
            ));
        }

        if self.project_names.is_empty() {
            return Err(ValidationError::NoProjects);
        }
        if let Some(bad) = self.project_names.iter().find(|p| !is_valid_project_name(p)) {
            return Err(ValidationError::InvalidProjectName(bad.clone()));
        }

        if self.files.is_empty() {
            return Err(ValidationError::NoFiles);
        }
        if let Some(bad) = self.files.iter().find(|f| !is_safe_relative_path(f)) {
            return Err(ValidationError::InvalidFilePath(bad.clone()));
        }

        Ok(())
    }

    /// The requested revision, or [`DEFAULT_REVISION`] if blank or absent.
    pub fn revision(&self) -> &str {
        resolve_revision(self.revision.as_deref())
    }
}

pub fn resolve_revision(revision: Option<&str>) -> &str {
    match revision.map(str::trim) {
        Some(r) if !r.is_empty() => r,
        _ => DEFAULT_REVISION,
    }
}

pub fn is_valid_repo_id(repo_id: &str) -> bool {
    REPO_ID_RE.is_match(repo_id) && !repo_id.split('/').any(|seg| seg == ".." || seg == ".")
}

/// A branch, tag or commit name usable as a URL path and cache directory.
///
/// Absent or blank means the default branch. Otherwise every `/`-separated
/// segment must be non-empty, must not be `.` or `..`, and the whole name
/// must be free of control characters and backslashes.
pub fn is_valid_revision(revision: Option<&str>) -> bool {
    let Some(revision) = revision.map(str::trim).filter(|r| !r.is_empty()) else {
        return true;
    };
    if revision.chars().any(|c| c.is_control() || c == '\\') {
        return false;
    }
    revision
        .split('/')
        .all(|seg| !seg.is_empty() && seg != "." && seg != "..")
}

fn is_valid_project_name(name: &str) -> bool {
    let name = name.trim();
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// True for a non-empty path made only of normal components.
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.trim().is_empty() || path.contains('\\') {
        return false;
    }
    let mut components = Path::new(path).components();
    components
        .clone()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        && components.any(|c| matches!(c, Component::Normal(_)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `pending -> running -> {completed | failed}`; staying put is allowed.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (a, b) if a == b => !a.is_terminal(),
            (Pending, Running) => true,
            (Running, Completed | Failed) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status record of one prefetch job. Owned by the job store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub total_files: u64,
    pub downloaded_files: u64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: String, total_files: u64) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            total_files,
            downloaded_files: 0,
            message: String::new(),
            created_at: Utc::now(),
        }
    }

    pub fn progress(&self) -> f64 {
        if self.total_files == 0 {
            0.0
        } else {
            self.downloaded_files as f64 / self.total_files as f64
        }
    }
}

/// Partial change applied atomically to a job by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    /// Added to `downloaded_files`
    pub downloaded_delta: u64,
    pub message: Option<String>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// One more file fetched and distributed; clears the message.
    pub fn file_done() -> Self {
        Self {
            downloaded_delta: 1,
            message: Some(String::new()),
            ..Default::default()
        }
    }

    pub fn completed() -> Self {
        Self {
            status: Some(JobStatus::Completed),
            message: Some(String::new()),
            ..Default::default()
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(JobStatus::Failed),
            message: Some(message.into()),
            ..Default::default()
        }
    }
}
