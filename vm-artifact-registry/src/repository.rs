//! # Repositories
//!
//! A [`Repository`] binds a name, visibility, deploy/redeploy policy and quota to one
//! [`StorageBackend`]. Repositories are built from configuration at start-up and
//! only replaced as a whole when the configuration is reloaded: a
//! [`RepositorySet`] is an immutable snapshot, and [`RepositoryRegistry`] swaps
//! snapshots atomically.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::auth::VisibilityGate;
use crate::config::{Config, RepositoryConfig};
use crate::error::{AppError, AppResult};
use crate::location::{Location, LocationError};
use crate::storage::{self, FileDetails, StorageBackend};
use crate::upstream::UpstreamClient;

/// Prefix of every repository inside the shared storage layout.
pub const STORAGE_ROOT: &str = "repositories";

/// Who may see a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Readable by everyone, browsable
    #[default]
    Public,
    /// Readable by everyone who knows the path, not browsable anonymously
    Hidden,
    /// Readable by authenticated identities only
    Private,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Visibility::Public => write!(f, "PUBLIC"),
            Visibility::Hidden => write!(f, "HIDDEN"),
            Visibility::Private => write!(f, "PRIVATE"),
        }
    }
}

/// One addressable repository.
pub struct Repository {
    name: String,
    visibility: Visibility,
    deploy_enabled: bool,
    redeploy_allowed: bool,
    quota_bytes: Option<u64>,
    proxy_private: bool,
    mirrors: Vec<Arc<UpstreamClient>>,
    backend: Arc<dyn StorageBackend>,
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.name)
            .field("visibility", &self.visibility)
            .field("backend", &self.backend.kind())
            .field("mirrors", &self.mirrors.len())
            .finish()
    }
}

impl Repository {
    /// Build a repository from its configuration entry.
    pub async fn from_config(config: &RepositoryConfig, data_dir: &Path) -> AppResult<Self> {
        let backend = storage::create_backend(&config.storage, data_dir, &config.name)
            .await
            .map_err(|e| AppError::storage(format!("repository {}", config.name), e))?;

        let mirrors = config
            .mirrors
            .iter()
            .map(|definition| UpstreamClient::new(definition.clone()).map(Arc::new))
            .collect::<AppResult<Vec<_>>>()?;

        Ok(Self::with_backend(config, backend, mirrors))
    }

    /// Build a repository around an existing backend.
    pub fn with_backend(
        config: &RepositoryConfig,
        backend: Arc<dyn StorageBackend>,
        mirrors: Vec<Arc<UpstreamClient>>,
    ) -> Self {
        Self {
            name: config.name.clone(),
            visibility: config.visibility,
            deploy_enabled: config.deploy_enabled,
            redeploy_allowed: config.redeploy_allowed,
            quota_bytes: config.quota_bytes,
            proxy_private: config.proxy_private,
            mirrors,
            backend,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn quota_bytes(&self) -> Option<u64> {
        self.quota_bytes
    }

    pub fn mirrors(&self) -> &[Arc<UpstreamClient>] {
        &self.mirrors
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Whether mirrors may be consulted on a local miss.
    pub fn proxies(&self) -> bool {
        !self.mirrors.is_empty() && (self.visibility != Visibility::Private || self.proxy_private)
    }

    /// Turn a GAV or a storage path into a repository-relative [`Location`].
    ///
    /// Accepts `com/example/...` as well as `repositories/{name}/com/example/...`;
    /// the storage prefix is stripped until none is left, so applying it twice gives
    /// the same result.
    pub fn relativize(&self, raw: &str) -> Result<Location, LocationError> {
        let mut location = Location::parse(raw)?;
        let storage_prefix = Location::parse(&format!("{STORAGE_ROOT}/{}", self.name))?;

        while let Some(relative) = location.strip_prefix(&storage_prefix) {
            if relative == location {
                break;
            }
            location = relative;
        }
        Ok(location)
    }

    /// Path of `location` in the shared storage layout, for logs and reports.
    pub fn storage_path(&self, location: &Location) -> String {
        if location.is_root() {
            format!("{STORAGE_ROOT}/{}", self.name)
        } else {
            format!("{STORAGE_ROOT}/{}/{location}", self.name)
        }
    }

    /// Check that `length` more bytes fit into the quota.
    pub async fn can_hold(&self, length: u64) -> AppResult<()> {
        let Some(quota) = self.quota_bytes else {
            return Ok(());
        };
        let usage = self
            .backend
            .usage()
            .await
            .map_err(|e| AppError::storage(self.storage_path(&Location::root()), e))?;

        if usage.saturating_add(length) > quota {
            debug!(repository = %self.name, usage, length, quota, "Quota check failed");
            return Err(AppError::QuotaExceeded(format!(
                "Repository '{}' has no room for {length} more bytes",
                self.name
            )));
        }
        Ok(())
    }

    pub fn is_deploy_allowed(&self, is_redeploy: bool) -> bool {
        self.deploy_enabled && (!is_redeploy || self.redeploy_allowed)
    }

    pub async fn put(&self, location: &Location, content: Bytes) -> AppResult<FileDetails> {
        self.backend
            .put(location, content)
            .await
            .map_err(|e| AppError::storage(self.storage_path(location), e))
    }

    pub async fn get(&self, location: &Location) -> AppResult<Bytes> {
        self.backend
            .get(location)
            .await
            .map_err(|e| AppError::storage(self.storage_path(location), e))
    }

    pub async fn details(&self, location: &Location) -> AppResult<FileDetails> {
        self.backend
            .details(location)
            .await
            .map_err(|e| AppError::storage(self.storage_path(location), e))
    }

    pub async fn remove(&self, location: &Location) -> AppResult<()> {
        self.backend
            .remove(location)
            .await
            .map_err(|e| AppError::storage(self.storage_path(location), e))
    }

    pub async fn list_details(
        &self,
        location: &Location,
    ) -> AppResult<Vec<(Location, FileDetails)>> {
        self.backend
            .list_details(location)
            .await
            .map_err(|e| AppError::storage(self.storage_path(location), e))
    }

    pub async fn exists(&self, location: &Location) -> bool {
        self.backend.exists(location).await
    }
}

/// Immutable snapshot of all configured repositories, together with the
/// configuration they were built from.
#[derive(Debug, Default)]
pub struct RepositorySet {
    repositories: HashMap<String, Arc<Repository>>,
    config: Arc<Config>,
    default_gate: VisibilityGate,
    generation: u64,
}

impl RepositorySet {
    /// Build every repository of `config`.
    pub async fn from_config(config: Config, generation: u64) -> AppResult<Self> {
        config.validate()?;
        let mut repositories = Vec::new();
        for entry in &config.repositories {
            let repository = Repository::from_config(entry, &config.storage.data_dir).await?;
            info!(
                repository = %entry.name,
                visibility = %entry.visibility,
                backend = repository.backend().kind(),
                mirrors = entry.mirrors.len(),
                "Repository ready"
            );
            repositories.push(repository);
        }
        Ok(Self::from_repositories(repositories, Arc::new(config), generation))
    }

    pub fn from_repositories(
        repositories: Vec<Repository>,
        config: Arc<Config>,
        generation: u64,
    ) -> Self {
        Self {
            repositories: repositories
                .into_iter()
                .map(|repository| (repository.name.clone(), Arc::new(repository)))
                .collect(),
            default_gate: VisibilityGate::new(&config.security),
            config,
            generation,
        }
    }

    pub fn get(&self, name: &str) -> AppResult<Arc<Repository>> {
        self.repositories
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Repository not found: {name}")))
    }

    /// Repository names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.repositories.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Gate derived from the security section of this snapshot's configuration.
    pub fn default_gate(&self) -> &VisibilityGate {
        &self.default_gate
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Holder of the current [`RepositorySet`].
///
/// Callers take a snapshot at the start of an operation and keep using it even if a
/// reload happens meanwhile.
#[derive(Debug, Default)]
pub struct RepositoryRegistry {
    current: RwLock<Arc<RepositorySet>>,
}

impl RepositoryRegistry {
    pub fn new(set: RepositorySet) -> Self {
        Self {
            current: RwLock::new(Arc::new(set)),
        }
    }

    pub fn snapshot(&self) -> Arc<RepositorySet> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, set: RepositorySet) {
        let set = Arc::new(set);
        match self.current.write() {
            Ok(mut guard) => *guard = set,
            Err(poisoned) => *poisoned.into_inner() = set,
        }
    }
}
