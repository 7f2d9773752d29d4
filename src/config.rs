//! Layered daemon configuration.
//!
//! Sources are merged in order, later ones winning: built-in defaults,
//! the TOML config file, `PREFETCHD_*` environment variables, `HF_TOKEN`,
//! and finally any flags given on the command line.

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "prefetchd.toml";
const ENV_PREFIX: &str = "PREFETCHD_";
const TOKEN_ENV: &str = "HF_TOKEN";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root of the per-project layout: `<data>/<project>/<repo>/<path>`
    pub data_directory: PathBuf,
    /// Root of the fetch cache
    pub cache_directory: PathBuf,
    pub http_bind: SocketAddr,
    pub hub_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_token: Option<String>,
    pub request_timeout_secs: u64,
    /// fsync every copied file before reporting it done
    pub sync_files: bool,
    /// Re-hash each destination after copying
    pub verify_copies: bool,
    /// Serve from the in-memory hub instead of the network
    pub simulation: bool,
    pub verbose: bool,
    pub log_json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("data"),
            cache_directory: PathBuf::from("cache"),
            http_bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
            hub_endpoint: "https://huggingface.co".to_string(),
            hub_token: None,
            request_timeout_secs: 300,
            sync_files: true,
            verify_copies: false,
            simulation: false,
            verbose: false,
            log_json: false,
        }
    }
}

impl AppConfig {
    /// Load the configuration, layering `overrides` (usually CLI flags) on top.
    ///
    /// A missing config file is not an error; `config_file` defaults to
    /// [`DEFAULT_CONFIG_FILE`] in the working directory.
    pub fn new<T: Serialize>(config_file: Option<&Path>, overrides: Option<&T>) -> Result<Self> {
        let file = config_file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX))
            .merge(Env::raw().only(&[TOKEN_ENV]).map(|_| "hub_token".into()));

        if let Some(overrides) = overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        figment
            .extract()
            .with_context(|| format!("Failed to load configuration (file: {})", file.display()))
    }

    /// Render the effective configuration as TOML, omitting the hub token.
    pub fn to_toml(&self) -> Result<String> {
        let mut redacted = self.clone();
        redacted.hub_token = None;
        toml::to_string_pretty(&redacted).context("Failed to serialize config")
    }
}
