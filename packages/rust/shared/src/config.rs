//! Application configuration for khub.
//!
//! The builder reads `configuration/khub.toml` relative to the working
//! directory. A missing file is replaced by a default one on first start.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::auth::AuthenticationHeader;
use crate::error::{KhubError, Result};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "configuration/khub.toml";

// ---------------------------------------------------------------------------
// Config structs (matching khub.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Wiki source.
    #[serde(default = "SourceConfig::confluence")]
    pub confluence: SourceConfig,

    /// Team-chat source.
    #[serde(default = "SourceConfig::teams")]
    pub teams: SourceConfig,

    /// Staging store connection and optional hosting process.
    #[serde(default)]
    pub store: StoreConfig,

    /// Crawl tuning.
    #[serde(default)]
    pub crawl: CrawlConfig,

    /// Orchestrator settings.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Filesystem locations handed to downstream stages.
    #[serde(default)]
    pub paths: PathsConfig,

    /// External commands per pipeline step, keyed by step slug
    /// (e.g. `knowledge-mapping`).
    #[serde(default)]
    pub stages: BTreeMap<String, StageCommandConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            confluence: SourceConfig::confluence(),
            teams: SourceConfig::teams(),
            store: StoreConfig::default(),
            crawl: CrawlConfig::default(),
            pipeline: PipelineConfig::default(),
            paths: PathsConfig::default(),
            stages: BTreeMap::new(),
        }
    }
}

/// `[confluence]` / `[teams]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceConfig {
    /// API root, e.g. `https://acme.atlassian.net/wiki/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Url>,

    /// Credential header parts.
    #[serde(default)]
    pub header: HeaderConfig,
}

impl SourceConfig {
    fn confluence() -> Self {
        Self {
            endpoint: None,
            header: HeaderConfig {
                key: Some("Authorization".into()),
                scheme: Some("Basic".into()),
                token_env: Some("CONFLUENCE_TOKEN".into()),
                ..HeaderConfig::default()
            },
        }
    }

    fn teams() -> Self {
        Self {
            endpoint: None,
            header: HeaderConfig {
                key: Some("Authorization".into()),
                scheme: Some("Bearer".into()),
                token_env: Some("TEAMS_TOKEN".into()),
                ..HeaderConfig::default()
            },
        }
    }

    /// Resolve the header, reading the token from the environment when needed.
    pub fn authentication_header(&self) -> AuthenticationHeader {
        if self.header.anonymous {
            return AuthenticationHeader::anonymous();
        }

        let token = self.header.token.clone().or_else(|| {
            self.header
                .token_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
        });

        AuthenticationHeader::new(self.header.key.clone(), self.header.scheme.clone(), token)
    }

    /// A source is enabled when it has an endpoint and a valid header.
    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some() && self.authentication_header().is_valid()
    }
}

/// `[<source>.header]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderConfig {
    /// Header name, e.g. `Authorization` or `Cookie`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,

    /// Scheme prefix, e.g. `Basic` or `Bearer`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    /// Literal token. Prefer `token_env` outside of local experiments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Name of the env var holding the token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Send no credential header at all.
    #[serde(default)]
    pub anonymous: bool,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Local libSQL database file. Ignored when `url` is set.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Remote libSQL (`sqld`) URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Env var holding the remote auth token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token_env: Option<String>,

    /// Process that hosts the store (e.g. a compose project running `sqld`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<StoreHostConfig>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            url: None,
            auth_token_env: None,
            host: None,
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("var/staging.db")
}

impl StoreConfig {
    /// Where the staging store lives.
    pub fn location(&self) -> StoreLocation {
        match &self.url {
            Some(url) => StoreLocation::Remote {
                url: url.clone(),
                auth_token: self
                    .auth_token_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
                    .unwrap_or_default(),
            },
            None => StoreLocation::Local(self.path.clone()),
        }
    }
}

/// Resolved staging store location.
#[derive(Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// Embedded database file.
    Local(PathBuf),
    /// Remote `sqld` server.
    Remote { url: String, auth_token: String },
}

impl std::fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote { url, .. } => write!(f, "{url}"),
        }
    }
}

impl std::fmt::Debug for StoreLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "StoreLocation({self})")
    }
}

/// `[store.host]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHostConfig {
    /// Command starting the host, e.g. `["docker", "compose", "-p", "knowledge-hub", "up"]`.
    pub command: Vec<String>,

    /// Command stopping the host after the run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop_command: Vec<String>,

    /// Working directory for both commands.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// How long to wait for the store to answer after starting the host.
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Delay between liveness checks.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_ready_timeout() -> u64 {
    60
}
fn default_poll_interval() -> u64 {
    1000
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Maximum concurrent branch tasks per fan-out level.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Per-request timeout. Unset means none; the step watchdog still applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            request_timeout_secs: None,
        }
    }
}

fn default_concurrency() -> usize {
    8
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Wall-clock ceiling per step before the process is terminated.
    #[serde(default = "default_watchdog_secs")]
    pub watchdog_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            watchdog_secs: default_watchdog_secs(),
        }
    }
}

fn default_watchdog_secs() -> u64 {
    60 * 60
}

/// `[paths]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub processing: PathBuf,
    pub knowledge: PathBuf,
    pub content: PathBuf,
    pub ontology: PathBuf,
    pub queries: PathBuf,
    pub tdb: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            processing: "configuration/processing".into(),
            knowledge: "var/knowledge".into(),
            content: "var/content".into(),
            ontology: "configuration/ontology".into(),
            queries: "configuration/queries".into(),
            tdb: "var/tdb".into(),
        }
    }
}

impl PathsConfig {
    /// `(name, path)` pairs, used to expose paths to stage commands.
    pub fn entries(&self) -> [(&'static str, &Path); 6] {
        [
            ("processing", &self.processing),
            ("knowledge", &self.knowledge),
            ("content", &self.content),
            ("ontology", &self.ontology),
            ("queries", &self.queries),
            ("tdb", &self.tdb),
        ]
    }
}

/// `[stages.<slug>]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCommandConfig {
    /// Program and arguments.
    pub command: Vec<String>,

    /// Working directory for the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Check the config once at startup. Disabled sources are not an error.
    pub fn validate(&self) -> Result<()> {
        if self.crawl.concurrency == 0 {
            return Err(KhubError::config("crawl.concurrency must be at least 1"));
        }
        if self.pipeline.watchdog_secs == 0 {
            return Err(KhubError::config("pipeline.watchdog_secs must be at least 1"));
        }
        if self.store.url.is_none() && self.store.path.as_os_str().is_empty() {
            return Err(KhubError::config("store.path or store.url must be set"));
        }
        if let Some(host) = &self.store.host {
            if host.command.is_empty() {
                return Err(KhubError::config("store.host.command must not be empty"));
            }
        }
        for (slug, stage) in &self.stages {
            if stage.command.is_empty() {
                return Err(KhubError::config(format!(
                    "stages.{slug}.command must not be empty"
                )));
            }
        }

        for (name, source) in [("confluence", &self.confluence), ("teams", &self.teams)] {
            if source.endpoint.is_none() {
                tracing::info!(source = name, "no endpoint configured");
            } else if !source.authentication_header().is_valid() {
                tracing::info!(source = name, "header configuration is incomplete");
            }
        }
        Ok(())
    }

    /// `[stages.<slug>]` keys that no step in `known` will ever run.
    pub fn unknown_stages(&self, known: &[String]) -> Vec<&str> {
        self.stages
            .keys()
            .filter(|slug| !known.contains(*slug))
            .map(String::as_str)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Load the config at `path`, writing a default file first if none exists.
pub fn load_or_init_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        init_config(path)?;
    }
    load_config_from(path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| KhubError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| KhubError::config(format!("failed to parse {}: {e}", path.display())))?;

    tracing::info!(?path, "configuration loaded");
    Ok(config)
}

/// Write a default config file at `path`, creating parent directories.
pub fn init_config(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| KhubError::io(dir, e))?;
    }

    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| KhubError::config(e.to_string()))?;

    std::fs::write(path, content).map_err(|e| KhubError::io(path, e))?;
    tracing::info!(?path, "created default config file");
    Ok(())
}
