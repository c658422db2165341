//! # Configuration Management
//!
//! Configuration for the artifact registry, loaded from JSON. It covers:
//!
//! - Server settings (host, port)
//! - The data directory that holds file system repositories
//! - Logging level and format
//! - Metadata cache bounds
//! - Mirror fetch limits
//! - The repositories themselves, with their policies, storage and mirrors
//!
//! Every section has defaults, so an empty JSON object is a valid configuration.
//!
//! ```rust,no_run
//! # use vm_artifact_registry::config::Config;
//! // Load from file with fallback to defaults
//! let config = Config::load_or_default("registry.json")?;
//! config.validate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! A configuration is an immutable snapshot: reloading builds a new snapshot and
//! swaps it in, see [`ArtifactService::reload`](crate::service::ArtifactService::reload).

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, AppResult};
use crate::repository::Visibility;
use crate::storage::StorageConfig;

/// Main configuration structure for the artifact registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metadata_cache: CacheConfig,
    #[serde(default)]
    pub mirrors: MirrorSettings,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default = "default_repositories")]
    pub repositories: Vec<RepositoryConfig>,
}

/// Server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Location of local repository data.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    /// Base directory; file system repositories live in `{data_dir}/repositories/{name}`
    pub data_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Log output settings. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Bounds of the generated index document cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
        }
    }
}

/// Limits applied to every mirror fetch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MirrorSettings {
    /// Upper bound for a coalesced fetch, shared by every caller waiting on it
    pub fetch_timeout_secs: u64,
    /// Largest artifact accepted from a mirror or a deploy
    pub max_artifact_size_mb: u64,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_secs: 60,
            max_artifact_size_mb: 512,
        }
    }
}

impl MirrorSettings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn max_artifact_size_bytes(&self) -> u64 {
        self.max_artifact_size_mb * 1024 * 1024
    }
}

/// Settings for the default authorization gate.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct SecurityConfig {
    /// Identities allowed to deploy and delete; empty means any authenticated identity
    pub deployers: Vec<String>,
}

/// One repository entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepositoryConfig {
    pub name: String,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default = "default_true")]
    pub deploy_enabled: bool,
    #[serde(default)]
    pub redeploy_allowed: bool,
    #[serde(default)]
    pub quota_bytes: Option<u64>,
    /// Consult mirrors for this repository even when it is private
    #[serde(default)]
    pub proxy_private: bool,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub mirrors: Vec<MirrorDefinition>,
}

impl RepositoryConfig {
    pub fn new(name: impl Into<String>, visibility: Visibility) -> Self {
        Self {
            name: name.into(),
            visibility,
            deploy_enabled: true,
            redeploy_allowed: false,
            quota_bytes: None,
            proxy_private: false,
            storage: StorageConfig::default(),
            mirrors: Vec::new(),
        }
    }
}

/// Upstream repository consulted on a local miss.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MirrorDefinition {
    pub url: Url,
    #[serde(default)]
    pub credentials: Option<MirrorCredentials>,
    /// Regular expression a requested path must match for this mirror to be asked
    #[serde(default)]
    pub allow_pattern: Option<String>,
    #[serde(default = "default_true")]
    pub store_locally: bool,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

impl MirrorDefinition {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            credentials: None,
            allow_pattern: None,
            store_locally: true,
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Basic credentials for a mirror.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct MirrorCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for MirrorCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MirrorCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout() -> u64 {
    3
}

fn default_read_timeout() -> u64 {
    15
}

fn default_repositories() -> Vec<RepositoryConfig> {
    let mut snapshots = RepositoryConfig::new("snapshots", Visibility::Public);
    snapshots.redeploy_allowed = true;

    vec![
        RepositoryConfig::new("releases", Visibility::Public),
        snapshots,
        RepositoryConfig::new("private", Visibility::Private),
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageSettings::default(),
            logging: LoggingConfig::default(),
            metadata_cache: CacheConfig::default(),
            mirrors: MirrorSettings::default(),
            security: SecurityConfig::default(),
            repositories: default_repositories(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or does not match the configuration format.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let path = path.as_ref();
        let config_str = fs::read_to_string(path).map_err(|e| {
            AppError::BadRequest(format!(
                "Failed to read configuration {}: {e}",
                path.display()
            ))
        })?;
        serde_json::from_str(&config_str)
            .map_err(|e| AppError::BadRequest(format!("Invalid configuration: {e}")))
    }

    /// Load configuration from file with fallback to defaults when the file is absent.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Check the invariants serde cannot express.
    pub fn validate(&self) -> AppResult<()> {
        let mut names = HashSet::new();
        for repository in &self.repositories {
            let name = repository.name.as_str();
            if name.is_empty()
                || name.contains(['/', '\\'])
                || name.contains("..")
                || name.chars().any(|c| c.is_control() || c.is_whitespace())
            {
                return Err(AppError::BadRequest(format!(
                    "Invalid repository name: '{name}'"
                )));
            }
            if !names.insert(name) {
                return Err(AppError::BadRequest(format!(
                    "Duplicate repository name: '{name}'"
                )));
            }

            for mirror in &repository.mirrors {
                if !matches!(mirror.url.scheme(), "http" | "https") {
                    return Err(AppError::BadRequest(format!(
                        "Mirror of '{name}' must use http or https: {}",
                        mirror.url
                    )));
                }
                if let Some(pattern) = &mirror.allow_pattern {
                    Regex::new(pattern).map_err(|e| {
                        AppError::BadRequest(format!(
                            "Invalid allow_pattern for mirror {} of '{name}': {e}",
                            mirror.url
                        ))
                    })?;
                }
            }
        }
        if self.metadata_cache.max_entries == 0 {
            return Err(AppError::BadRequest(
                "metadata_cache.max_entries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
