//! YAML configuration: where to list/watch from, where to write, what to mirror.
//!
//! # Storage layout
//!
//! ```text
//! ~/.kubesync/
//!   config.yaml
//! ```
//!
//! # API pattern
//!
//! - `fn_at(home: &Path, …)`: explicit home, used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::ResourceType;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SINK_ROOT: &str = "kubernetes";
pub const DEFAULT_BACKOFF_MIN_MS: u64 = 1_000;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Root of the kubesync YAML configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub resources: Vec<ResourceType>,
}

/// Remote list/watch API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub api_server: String,
    /// File holding a bearer token, re-read on every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Local data store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Data root every resource prefix is nested under.
    #[serde(default = "default_sink_root")]
    pub root: String,
    /// Per-request timeout, covering connect and the whole response.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Retry delay bounds in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_min_ms")]
    pub min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            min_ms: DEFAULT_BACKOFF_MIN_MS,
            max_ms: DEFAULT_BACKOFF_MAX_MS,
        }
    }
}

impl BackoffConfig {
    pub fn min(&self) -> Duration {
        Duration::from_millis(self.min_ms)
    }

    pub fn max(&self) -> Duration {
        Duration::from_millis(self.max_ms)
    }
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_sink_root() -> String {
    DEFAULT_SINK_ROOT.to_string()
}

fn default_backoff_min_ms() -> u64 {
    DEFAULT_BACKOFF_MIN_MS
}

fn default_backoff_max_ms() -> u64 {
    DEFAULT_BACKOFF_MAX_MS
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.kubesync/config.yaml`. Pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    home.join(".kubesync").join("config.yaml")
}

/// `config_path_at` convenience wrapper.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    Ok(config_path_at(&home()?))
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

// ---------------------------------------------------------------------------
// Load + validate
// ---------------------------------------------------------------------------

/// Load and validate the config file at `path`.
///
/// Returns `ConfigError::NotFound` if absent, `ConfigError::Parse` (with path
/// and line context) if malformed, `ConfigError::Invalid` if it fails [`Config::validate`].
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let contents = std::fs::read_to_string(path)?;
    let config: Config = serde_yaml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// Load `<home>/.kubesync/config.yaml`.
pub fn load_at(home: &Path) -> Result<Config, ConfigError> {
    load_from(&config_path_at(home))
}

/// `load_at` convenience wrapper.
pub fn load() -> Result<Config, ConfigError> {
    load_at(&home()?)
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.api_server.trim().is_empty() {
            return Err(ConfigError::Invalid("source.api_server is empty".into()));
        }
        if self.sink.url.trim().is_empty() {
            return Err(ConfigError::Invalid("sink.url is empty".into()));
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::Invalid("source.timeout_secs must be > 0".into()));
        }
        if self.sink.timeout_secs == 0 {
            return Err(ConfigError::Invalid("sink.timeout_secs must be > 0".into()));
        }
        if self.backoff.min_ms == 0 {
            return Err(ConfigError::Invalid("backoff.min_ms must be > 0".into()));
        }
        if self.backoff.max_ms < self.backoff.min_ms {
            return Err(ConfigError::Invalid(format!(
                "backoff.max_ms ({}) is below backoff.min_ms ({})",
                self.backoff.max_ms, self.backoff.min_ms
            )));
        }
        if self.resources.is_empty() {
            return Err(ConfigError::Invalid("no resources configured".into()));
        }

        let mut seen = HashSet::new();
        // Each worker resets its whole subtree, so two types must never share one.
        let mut subtrees: HashMap<&str, &ResourceType> = HashMap::new();
        for rt in &self.resources {
            if rt.version.trim().is_empty() || rt.resource.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "resource '{rt}' needs both version and resource"
                )));
            }
            if !seen.insert(rt.to_string()) {
                return Err(ConfigError::Invalid(format!("resource '{rt}' listed twice")));
            }
            if let Some(other) = subtrees.insert(rt.storage_prefix(), rt) {
                return Err(ConfigError::Invalid(format!(
                    "resource '{rt}' would share sink subtree '{}' with '{other}'",
                    rt.storage_prefix()
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
