//! Boundary to the remote artifact hub.
//!
//! Two capabilities are consumed by the rest of the daemon:
//!
//! - [`RemoteListing`]: enumerate the files of a repository at a revision
//! - [`FetchCache`]: materialize one remote file in the local cache,
//!   downloading it only when it is not cached yet
//!
//! `HubClient` implements both against a Hugging-Face-compatible HTTP API.
//! `SimulatedHub` serves in-memory repositories for offline runs and tests.

mod http;
mod simulated;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::core::models::FileEntry;
use crate::error::HubError;

pub use http::HubClient;
pub use simulated::{DEMO_REPOSITORY, SimulatedHub};

#[async_trait]
pub trait RemoteListing: Send + Sync {
    /// List the files of `repo_id` at `revision` (default branch if `None`).
    async fn list_files(
        &self,
        repo_id: &str,
        revision: Option<&str>,
    ) -> Result<Vec<FileEntry>, HubError>;
}

#[async_trait]
pub trait FetchCache: Send + Sync {
    /// Return a local path holding the bytes of `path`, fetching if needed.
    async fn fetch(&self, repo_id: &str, revision: &str, path: &str) -> Result<PathBuf, HubError>;
}

/// Listing and fetching handles, usually backed by the same hub.
#[derive(Clone)]
pub struct Hub {
    pub listing: Arc<dyn RemoteListing>,
    pub fetcher: Arc<dyn FetchCache>,
}

impl Hub {
    pub fn from_backend<T>(backend: Arc<T>) -> Self
    where
        T: RemoteListing + FetchCache + 'static,
    {
        Self {
            listing: backend.clone(),
            fetcher: backend,
        }
    }
}

/// Build the hub selected by the configuration.
pub fn create_hub(config: &AppConfig) -> Result<Hub, HubError> {
    if config.simulation {
        let hub = SimulatedHub::with_demo_repository(&config.cache_directory);
        return Ok(Hub::from_backend(Arc::new(hub)));
    }

    let client = HubClient::new(
        &config.hub_endpoint,
        config.hub_token.clone(),
        &config.cache_directory,
        Duration::from_secs(config.request_timeout_secs),
    )?;
    Ok(Hub::from_backend(Arc::new(client)))
}

/// Cache location of one file: `<root>/<org>--<name>/<revision>/<path>`.
pub fn cache_path(cache_root: &Path, repo_id: &str, revision: &str, path: &str) -> PathBuf {
    cache_root
        .join(cache_segment(repo_id))
        .join(cache_segment(revision))
        .join(path)
}

/// Flatten a repo id or revision into exactly one directory name.
fn cache_segment(name: &str) -> String {
    let flat = name.replace(['/', '\\'], "--");
    if flat.is_empty() {
        return "%".to_string();
    }
    if flat.chars().all(|c| c == '.') {
        return flat.replace('.', "%2E");
    }
    flat
}

/// Hidden sibling a download is written to before being renamed into place.
///
/// Unique per attempt so concurrent fetches never share a partial file.
fn part_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{}.{}.part", name, Uuid::now_v7().simple()))
}

/// Hidden top-level entries (e.g. `.gitattributes`) are not offered.
fn is_listed(path: &str) -> bool {
    !path.is_empty() && !path.starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_path_flattens_repo_and_revision() {
        let p = cache_path(Path::new("/cache"), "org/model", "refs/pr/1", "sub/w.bin");
        assert_eq!(p, PathBuf::from("/cache/org--model/refs--pr--1/sub/w.bin"));
    }

    #[test]
    fn dot_revisions_stay_inside_their_repository_slot() {
        let slot = Path::new("/cache/org--model");
        for revision in ["..", ".", ""] {
            let p = cache_path(Path::new("/cache"), "org/model", revision, "other--repo/main/x");
            let repo_dir = p.ancestors().nth(4);
            assert_eq!(repo_dir, Some(slot));
            assert!(
                p.components().all(|c| c != std::path::Component::ParentDir),
                "{}",
                p.display()
            );
        }
        assert_eq!(
            cache_path(Path::new("/cache"), "org/model", "..", "a.json"),
            PathBuf::from("/cache/org--model/%2E%2E/a.json")
        );
    }

    #[test]
    fn part_file_is_hidden_sibling() {
        let part = part_path(Path::new("/cache/org--m/main/sub/w.bin"));
        assert_eq!(part.parent(), Some(Path::new("/cache/org--m/main/sub")));
        let name = part.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(".w.bin."));
        assert!(name.ends_with(".part"));
        assert_ne!(part, part_path(Path::new("/cache/org--m/main/sub/w.bin")));
    }

    #[test]
    fn hidden_entries_are_not_listed() {
        assert!(is_listed("config.json"));
        assert!(is_listed("sub/.hidden"));
        assert!(!is_listed(".gitattributes"));
        assert!(!is_listed(""));
    }
}
