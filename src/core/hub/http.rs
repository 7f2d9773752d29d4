use async_trait::async_trait;
use reqwest::header::{HeaderMap, LINK};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tracing::{Instrument, debug, info, info_span};

use super::{FetchCache, RemoteListing, cache_path, is_listed, part_path};
use crate::core::models::{FileEntry, resolve_revision};
use crate::error::HubError;
use crate::logging::LogThrottle;

/// Client for a Hugging-Face-compatible hub with an on-disk file cache.
pub struct HubClient {
    endpoint: Url,
    token: Option<String>,
    cache_root: PathBuf,
    client: reqwest::Client,
}

/// One entry of `GET /api/models/{repo}/tree/{revision}`
#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
    path: String,
    #[serde(default)]
    size: Option<u64>,
}

impl HubClient {
    pub fn new(
        endpoint: &str,
        token: Option<String>,
        cache_root: &Path,
        timeout: Duration,
    ) -> Result<Self, HubError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| HubError::Transport(format!("invalid hub endpoint '{}': {}", endpoint, e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(HubError::Transport(format!(
                "invalid hub endpoint '{}'",
                endpoint
            )));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .user_agent(concat!("prefetchd/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            endpoint,
            token: token.filter(|t| !t.is_empty()),
            cache_root: cache_root.to_path_buf(),
            client,
        })
    }

    /// Endpoint URL extended with percent-encoded path segments.
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn get(&self, url: Url, what: &str) -> Result<Response, HubError> {
        let response = self.authorized(self.client.get(url.clone())).send().await?;
        check_status(response.status(), &url, what)?;
        Ok(response)
    }

    async fn download(&self, url: Url, path: &str, part: &Path) -> Result<u64, HubError> {
        let mut response = self.get(url, path).await?;
        let total = response.content_length();

        let mut file = tokio::fs::File::create(part).await.map_err(|e| io_err(part, e))?;
        let throttle = LogThrottle::new(Duration::from_millis(500));
        let mut received: u64 = 0;

        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await.map_err(|e| io_err(part, e))?;
            received += chunk.len() as u64;
            if throttle.should_log() {
                debug!(bytes = received, total = ?total, "Download progress");
            }
        }

        file.flush().await.map_err(|e| io_err(part, e))?;
        file.sync_all().await.map_err(|e| io_err(part, e))?;
        Ok(received)
    }

    async fn download_to_cache(
        &self,
        url: Url,
        path: &str,
        target: PathBuf,
    ) -> Result<PathBuf, HubError> {
        let part = part_path(&target);
        let start = Instant::now();

        let bytes = match self.download(url, path, &part).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part, &target).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(io_err(&target, e));
        }

        info!(
            bytes,
            duration_ms = start.elapsed().as_millis() as u64,
            "Downloaded file into cache"
        );
        Ok(target)
    }
}

#[async_trait]
impl RemoteListing for HubClient {
    async fn list_files(
        &self,
        repo_id: &str,
        revision: Option<&str>,
    ) -> Result<Vec<FileEntry>, HubError> {
        let revision = resolve_revision(revision);
        let mut url = self.url(
            ["api", "models"]
                .into_iter()
                .chain(repo_id.split('/'))
                .chain(["tree", revision]),
        );
        url.query_pairs_mut().append_pair("recursive", "true");

        let mut files = Vec::new();
        let mut next = Some(url);

        while let Some(page_url) = next.take() {
            let response = self.get(page_url, repo_id).await?;
            next = next_page(response.headers());

            let entries: Vec<TreeEntry> = response.json().await?;
            files.extend(
                entries
                    .into_iter()
                    .filter(|e| e.kind == "file" && is_listed(&e.path))
                    .map(|e| FileEntry {
                        path: e.path,
                        size: e.size,
                    }),
            );
        }

        debug!(repo_id, revision, count = files.len(), "Listed repository files");
        Ok(files)
    }
}

#[async_trait]
impl FetchCache for HubClient {
    async fn fetch(&self, repo_id: &str, revision: &str, path: &str) -> Result<PathBuf, HubError> {
        let target = cache_path(&self.cache_root, repo_id, revision, path);
        if tokio::fs::try_exists(&target).await.unwrap_or(false) {
            debug!(repo_id, revision, path, "Cache hit");
            return Ok(target);
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_err(parent, e))?;
        }

        let url = self.url(
            repo_id
                .split('/')
                .chain(["resolve", revision])
                .chain(path.split('/')),
        );
        let span = info_span!("hub_download", repo_id, revision, path);
        self.download_to_cache(url, path, target).instrument(span).await
    }
}

fn check_status(status: StatusCode, url: &Url, what: &str) -> Result<(), HubError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND => Err(HubError::NotFound(what.to_string())),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(HubError::Unauthorized(what.to_string()))
        }
        s => Err(HubError::Upstream {
            status: s.as_u16(),
            url: url.to_string(),
        }),
    }
}

/// Target of a `Link: <url>; rel="next"` header, if any.
fn next_page(headers: &HeaderMap) -> Option<Url> {
    let link = headers.get(LINK)?.to_str().ok()?;
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| matches!(p.trim(), r#"rel="next""# | "rel=next"));
        if !is_next {
            return None;
        }
        let target = target.trim().trim_start_matches('<').trim_end_matches('>');
        Url::parse(target).ok()
    })
}

fn io_err(path: &Path, source: std::io::Error) -> HubError {
    HubError::Io {
        path: path.to_path_buf(),
        source,
    }
}
