use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

use super::{FetchCache, RemoteListing, cache_path, is_listed, part_path};
use crate::core::models::{DEFAULT_REVISION, FileEntry, resolve_revision};
use crate::error::HubError;

/// Repository served when the daemon runs with `--simulation`.
pub const DEMO_REPOSITORY: &str = "prefetchd/demo-model";

type RepoKey = (String, String);

#[derive(Default)]
struct SimState {
    /// (repo, revision) -> path -> bytes
    repos: HashMap<RepoKey, BTreeMap<String, Vec<u8>>>,
    /// (repo, path) -> error text returned by fetch
    failures: HashMap<RepoKey, String>,
    /// (repo, revision, path) -> number of remote downloads
    fetches: HashMap<(String, String, String), usize>,
}

/// In-memory hub backed by a real on-disk cache.
///
/// Fetches count as remote downloads only when the file was not already
/// cached, which lets tests observe de-duplication.
pub struct SimulatedHub {
    cache_root: PathBuf,
    fetch_delay: Duration,
    state: Mutex<SimState>,
}

impl SimulatedHub {
    pub fn new(cache_root: &Path) -> Self {
        Self {
            cache_root: cache_root.to_path_buf(),
            fetch_delay: Duration::ZERO,
            state: Mutex::new(SimState::default()),
        }
    }

    /// A hub holding a small model repository on its default branch.
    pub fn with_demo_repository(cache_root: &Path) -> Self {
        let hub = Self::new(cache_root);
        hub.add_file(
            DEMO_REPOSITORY,
            DEFAULT_REVISION,
            "config.json",
            br#"{"architectures":["DemoModel"],"hidden_size":64}"#.to_vec(),
        );
        hub.add_file(
            DEMO_REPOSITORY,
            DEFAULT_REVISION,
            "tokenizer.json",
            br#"{"version":"1.0","model":{"type":"BPE"}}"#.to_vec(),
        );
        hub.add_file(
            DEMO_REPOSITORY,
            DEFAULT_REVISION,
            "model.safetensors",
            (0..64 * 1024).map(|i| (i % 251) as u8).collect(),
        );
        hub.add_file(
            DEMO_REPOSITORY,
            DEFAULT_REVISION,
            "README.md",
            b"# Demo model\n".to_vec(),
        );
        hub.add_file(
            DEMO_REPOSITORY,
            DEFAULT_REVISION,
            ".gitattributes",
            b"*.safetensors filter=lfs\n".to_vec(),
        );
        hub
    }

    /// Delay every remote download, to observe jobs while they run.
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn add_file(&self, repo_id: &str, revision: &str, path: &str, bytes: Vec<u8>) {
        self.state()
            .repos
            .entry((repo_id.to_string(), revision.to_string()))
            .or_default()
            .insert(path.to_string(), bytes);
    }

    /// Make every fetch of `path` in `repo_id` fail with `message`.
    pub fn fail_path(&self, repo_id: &str, path: &str, message: &str) {
        self.state()
            .failures
            .insert((repo_id.to_string(), path.to_string()), message.to_string());
    }

    /// How many times `path` was downloaded rather than served from cache.
    pub fn fetch_count(&self, repo_id: &str, revision: &str, path: &str) -> usize {
        self.state()
            .fetches
            .get(&(repo_id.to_string(), revision.to_string(), path.to_string()))
            .copied()
            .unwrap_or(0)
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteListing for SimulatedHub {
    async fn list_files(
        &self,
        repo_id: &str,
        revision: Option<&str>,
    ) -> Result<Vec<FileEntry>, HubError> {
        let revision = resolve_revision(revision);
        let state = self.state();
        let files = state
            .repos
            .get(&(repo_id.to_string(), revision.to_string()))
            .ok_or_else(|| HubError::NotFound(format!("{}@{}", repo_id, revision)))?;

        Ok(files
            .iter()
            .filter(|(path, _)| is_listed(path))
            .map(|(path, bytes)| FileEntry {
                path: path.clone(),
                size: Some(bytes.len() as u64),
            })
            .collect())
    }
}

#[async_trait]
impl FetchCache for SimulatedHub {
    async fn fetch(&self, repo_id: &str, revision: &str, path: &str) -> Result<PathBuf, HubError> {
        let target = cache_path(&self.cache_root, repo_id, revision, path);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            debug!(repo_id, revision, path, "Cache hit");
            return Ok(target);
        }

        if !self.fetch_delay.is_zero() {
            sleep(self.fetch_delay).await;
        }

        let bytes = {
            let state = self.state();
            if let Some(message) = state
                .failures
                .get(&(repo_id.to_string(), path.to_string()))
            {
                return Err(HubError::Transport(message.clone()));
            }
            state
                .repos
                .get(&(repo_id.to_string(), revision.to_string()))
                .and_then(|files| files.get(path))
                .cloned()
                .ok_or_else(|| HubError::NotFound(path.to_string()))?
        };

        let io_err = |p: &Path, source: std::io::Error| HubError::Io {
            path: p.to_path_buf(),
            source,
        };
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }
        let part = part_path(&target);
        let written = match tokio::fs::write(&part, &bytes).await {
            Ok(()) => tokio::fs::rename(&part, &target).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(io_err(&target, e));
        }

        *self
            .state()
            .fetches
            .entry((repo_id.to_string(), revision.to_string(), path.to_string()))
            .or_default() += 1;

        debug!(repo_id, revision, path, bytes = bytes.len(), "Simulated download");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn demo_listing_hides_dotfiles() {
        let temp = tempdir().unwrap();
        let hub = SimulatedHub::with_demo_repository(temp.path());

        let files = hub.list_files(DEMO_REPOSITORY, None).await.unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();

        assert_eq!(
            paths,
            vec!["README.md", "config.json", "model.safetensors", "tokenizer.json"]
        );
        assert!(files.iter().all(|f| f.size.is_some()));
    }

    #[tokio::test]
    async fn unknown_repository_or_revision_is_not_found() {
        let temp = tempdir().unwrap();
        let hub = SimulatedHub::with_demo_repository(temp.path());

        assert!(matches!(
            hub.list_files("nobody/nothing", None).await,
            Err(HubError::NotFound(_))
        ));
        assert!(matches!(
            hub.list_files(DEMO_REPOSITORY, Some("v9")).await,
            Err(HubError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn second_fetch_is_served_from_cache() {
        let temp = tempdir().unwrap();
        let hub = SimulatedHub::new(temp.path());
        hub.add_file("org/m", "main", "sub/a.bin", b"abc".to_vec());

        let first = hub.fetch("org/m", "main", "sub/a.bin").await.unwrap();
        let second = hub.fetch("org/m", "main", "sub/a.bin").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"abc");
        assert_eq!(hub.fetch_count("org/m", "main", "sub/a.bin"), 1);
    }

    #[tokio::test]
    async fn injected_failure_is_reported() {
        let temp = tempdir().unwrap();
        let hub = SimulatedHub::new(temp.path());
        hub.add_file("org/m", "main", "b.bin", b"b".to_vec());
        hub.fail_path("org/m", "b.bin", "network unreachable");

        let err = hub.fetch("org/m", "main", "b.bin").await.unwrap_err();
        assert!(err.to_string().contains("network unreachable"));
        assert_eq!(hub.fetch_count("org/m", "main", "b.bin"), 0);
    }

    #[tokio::test]
    async fn concurrent_fetches_only_see_whole_files() {
        let temp = tempdir().unwrap();
        let hub = std::sync::Arc::new(SimulatedHub::new(temp.path()));
        let bytes: Vec<u8> = (0..512 * 1024).map(|i| (i % 251) as u8).collect();
        hub.add_file("org/m", "main", "big.bin", bytes.clone());

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let hub = hub.clone();
            tasks.push(tokio::spawn(async move {
                let path = hub.fetch("org/m", "main", "big.bin").await.unwrap();
                std::fs::read(path).unwrap()
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap(), bytes);
        }

        let slot = temp.path().join("org--m/main");
        let names: Vec<String> = std::fs::read_dir(&slot)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["big.bin"]);
    }
}
