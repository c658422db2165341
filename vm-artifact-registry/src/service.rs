//! # Artifact Service
//!
//! The facade every adapter (HTTP, CLI, embedding code) goes through. Each operation
//! takes a snapshot of the current repository set, checks the authorization gate,
//! and then works against one repository:
//!
//! - [`lookup`](ArtifactService::lookup) reads locally, generates index documents, and
//!   falls back to mirrors on a miss
//! - [`deploy`](ArtifactService::deploy) enforces policy, quota and size, writes the
//!   artifact with its checksums and evicts the affected index documents
//! - [`delete`](ArtifactService::delete) removes files or directories with their
//!   checksums and the affected index documents
//!
//! Internal failures are reported to the [`FailureSink`] with their full context
//! and reach the caller only as a generic error.

use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::auth::{AccessMethod, AuthorizationGate, Identity};
use crate::checksum::{self, is_checksum_file};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::failure::{FailureSink, TracingFailureSink};
use crate::location::Location;
use crate::metadata::{
    affected_indexes, index_of_checksum, is_metadata_file, CachedIndex, Metadata, MetadataCache,
    MetadataGenerator, METADATA_FILE,
};
use crate::mirror::MirrorResolver;
use crate::repository::{Repository, RepositoryRegistry, RepositorySet};
use crate::storage::FileDetails;

/// Result of a lookup. Directories carry no content.
#[derive(Debug, Clone)]
pub struct ResolvedArtifact {
    pub details: FileDetails,
    pub content: Option<Bytes>,
}

impl ResolvedArtifact {
    fn file(details: FileDetails, content: Bytes) -> Self {
        Self {
            details,
            content: Some(content),
        }
    }
}

impl From<Arc<CachedIndex>> for ResolvedArtifact {
    fn from(index: Arc<CachedIndex>) -> Self {
        Self::file(index.details.clone(), index.content.clone())
    }
}

/// External collaborators of the service.
#[derive(Clone)]
pub struct Collaborators {
    /// `None` uses the visibility gate of the current configuration snapshot
    pub gate: Option<Arc<dyn AuthorizationGate>>,
    pub sink: Arc<dyn FailureSink>,
    pub clock: Arc<dyn Clock>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            gate: None,
            sink: Arc::new(TracingFailureSink),
            clock: Arc::new(SystemClock),
        }
    }
}

pub struct ArtifactService {
    registry: RepositoryRegistry,
    reload_lock: tokio::sync::Mutex<()>,
    cache: MetadataCache,
    generator: MetadataGenerator,
    mirrors: MirrorResolver,
    gate: Option<Arc<dyn AuthorizationGate>>,
    sink: Arc<dyn FailureSink>,
}

impl ArtifactService {
    /// Build every configured repository and the service around them.
    pub async fn new(config: Config, collaborators: Collaborators) -> AppResult<Self> {
        let max_entries = config.metadata_cache.max_entries;
        let repositories = RepositorySet::from_config(config, 1).await?;
        Ok(Self::from_repositories(repositories, max_entries, collaborators))
    }

    /// Build the service around an already assembled repository set.
    pub fn from_repositories(
        repositories: RepositorySet,
        max_cache_entries: usize,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            registry: RepositoryRegistry::new(repositories),
            reload_lock: tokio::sync::Mutex::new(()),
            cache: MetadataCache::new(max_cache_entries),
            generator: MetadataGenerator::new(collaborators.clock),
            mirrors: MirrorResolver::new(Arc::clone(&collaborators.sink)),
            gate: collaborators.gate,
            sink: collaborators.sink,
        }
    }

    /// Current repository snapshot.
    pub fn repositories(&self) -> Arc<RepositorySet> {
        self.registry.snapshot()
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Mirror fetches currently running.
    pub fn mirrors_in_flight(&self) -> usize {
        self.mirrors.in_flight()
    }

    /// Replace the configuration.
    ///
    /// The new repository set is built and validated first; calls already running
    /// finish against the snapshot they started with.
    pub async fn reload(&self, config: Config) -> AppResult<()> {
        let _guard = self.reload_lock.lock().await;
        let generation = self.registry.snapshot().generation() + 1;
        let repositories = RepositorySet::from_config(config, generation).await?;
        let names = repositories.names();

        self.registry.replace(repositories);
        self.cache.purge();
        info!(generation, repositories = ?names, "Configuration reloaded");
        Ok(())
    }

    fn authorize(
        &self,
        snapshot: &RepositorySet,
        repository: &Repository,
        location: &Location,
        method: AccessMethod,
        identity: Option<&Identity>,
    ) -> AppResult<()> {
        let gate: &dyn AuthorizationGate = match &self.gate {
            Some(gate) => gate.as_ref(),
            None => snapshot.default_gate(),
        };
        gate.authorize(repository, location, method, identity)
            .inspect_err(|e| {
                warn!(
                    repository = %repository.name(),
                    location = %location,
                    method = %method,
                    identity = identity.map(Identity::name).unwrap_or("anonymous"),
                    error = %e,
                    "Access denied"
                );
            })
    }

    /// Report internal failures before they reach the caller.
    fn reported<T>(
        &self,
        context: impl FnOnce() -> String,
        result: AppResult<T>,
    ) -> AppResult<T> {
        if let Err(e) = &result {
            if e.is_internal() {
                self.sink.report(&context(), &e.report_context());
            }
        }
        result
    }

    fn evict(&self, repository: &Repository, indexes: &[Location]) {
        for index in indexes {
            self.cache.invalidate(repository.name(), index);
        }
    }

    /// Resolve a file, an index document or a directory.
    ///
    /// # Errors
    ///
    /// `NotFound` when neither the repository nor a mirror is configured to serve
    /// the path, `UpstreamUnavailable` when all mirrors were tried and failed.
    pub async fn lookup(
        &self,
        identity: Option<&Identity>,
        repository: &str,
        gav: &str,
    ) -> AppResult<ResolvedArtifact> {
        let snapshot = self.registry.snapshot();
        let repository = snapshot.get(repository)?;
        let location = repository.relativize(gav)?;
        self.authorize(&snapshot, &repository, &location, AccessMethod::Read, identity)?;

        let result = self.lookup_in(&snapshot, &repository, &location).await;
        self.reported(|| format!("lookup {}", repository.storage_path(&location)), result)
    }

    async fn lookup_in(
        &self,
        snapshot: &RepositorySet,
        repository: &Arc<Repository>,
        location: &Location,
    ) -> AppResult<ResolvedArtifact> {
        if is_metadata_file(location) {
            return match self.resolve_index(repository, location).await {
                Ok(index) => Ok(index.into()),
                Err(AppError::NotFound(message)) => {
                    self.index_miss(snapshot, repository, location, message).await
                }
                Err(e) => Err(e),
            };
        }

        // Index checksums always describe the document currently served.
        if let Some((index, algorithm)) = index_of_checksum(location) {
            return match self.resolve_index(repository, &index).await {
                Ok(document) => {
                    let digest = Bytes::from(algorithm.digest(&document.content));
                    let details = FileDetails::file(
                        location,
                        digest.len() as u64,
                        document.details.last_modified,
                    );
                    Ok(ResolvedArtifact::file(details, digest))
                }
                Err(AppError::NotFound(message)) => {
                    self.index_miss(snapshot, repository, location, message).await
                }
                Err(e) => Err(e),
            };
        }

        match repository.details(location).await {
            Ok(details) if details.is_directory() => Ok(ResolvedArtifact {
                details,
                content: None,
            }),
            Ok(details) => {
                let content = repository.get(location).await?;
                debug!(
                    repository = %repository.name(),
                    location = %location,
                    "Served local artifact"
                );
                Ok(ResolvedArtifact::file(details, content))
            }
            Err(AppError::NotFound(message)) => {
                if !repository.proxies() {
                    return Err(AppError::NotFound(message));
                }
                self.from_mirrors(snapshot, repository, location).await
            }
            Err(e) => Err(e),
        }
    }

    /// Nothing to generate an index from. Persisted copies are never served, since
    /// they may describe deleted contents; only a mirror can still answer.
    async fn index_miss(
        &self,
        snapshot: &RepositorySet,
        repository: &Arc<Repository>,
        location: &Location,
        message: String,
    ) -> AppResult<ResolvedArtifact> {
        if repository.proxies() {
            self.from_mirrors(snapshot, repository, location).await
        } else {
            Err(AppError::NotFound(message))
        }
    }

    async fn resolve_index(
        &self,
        repository: &Repository,
        location: &Location,
    ) -> AppResult<Arc<CachedIndex>> {
        self.cache
            .resolve(repository.name(), location, |started_at| {
                self.generator.generate(repository, location, move || {
                    self.cache.is_current(started_at)
                })
            })
            .await
    }

    async fn from_mirrors(
        &self,
        snapshot: &RepositorySet,
        repository: &Arc<Repository>,
        location: &Location,
    ) -> AppResult<ResolvedArtifact> {
        let fetched = self
            .mirrors
            .resolve(Arc::clone(repository), location, &snapshot.config().mirrors)
            .await?;
        if fetched.stored {
            self.evict(repository, &affected_indexes(location, false));
        }
        Ok(ResolvedArtifact::file(fetched.details, fetched.content))
    }

    /// Store `content` at `gav` together with its checksums.
    ///
    /// # Errors
    ///
    /// `Forbidden` when deploys (or redeploys) are disabled for the repository,
    /// `BadRequest` when the content exceeds the size limit, `QuotaExceeded` when it
    /// does not fit.
    pub async fn deploy(
        &self,
        identity: Option<&Identity>,
        repository: &str,
        gav: &str,
        content: Bytes,
    ) -> AppResult<FileDetails> {
        let snapshot = self.registry.snapshot();
        let repository = snapshot.get(repository)?;
        let location = repository.relativize(gav)?;
        if location.is_root() {
            return Err(AppError::BadRequest(
                "Cannot deploy to the repository root".to_string(),
            ));
        }
        self.authorize(&snapshot, &repository, &location, AccessMethod::Write, identity)?;

        let result = self.deploy_in(&snapshot, &repository, &location, content).await;
        self.reported(|| format!("deploy {}", repository.storage_path(&location)), result)
    }

    async fn deploy_in(
        &self,
        snapshot: &RepositorySet,
        repository: &Repository,
        location: &Location,
        content: Bytes,
    ) -> AppResult<FileDetails> {
        let max_size = snapshot.config().mirrors.max_artifact_size_bytes();
        if content.len() as u64 > max_size {
            return Err(AppError::BadRequest(format!(
                "Artifact of {} bytes exceeds the {max_size} byte limit",
                content.len()
            )));
        }

        let is_redeploy = !is_metadata_file(location)
            && !is_checksum_file(location)
            && repository.exists(location).await;
        if !repository.is_deploy_allowed(is_redeploy) {
            let reason = if is_redeploy {
                "redeploys are not allowed"
            } else {
                "deploys are disabled"
            };
            return Err(AppError::Forbidden(format!(
                "Cannot deploy {location} to '{}': {reason}",
                repository.name()
            )));
        }

        repository.can_hold(content.len() as u64).await?;

        let details = repository.put(location, content.clone()).await?;
        let mut written = Vec::new();
        for (companion, digest) in checksum::companions(location, &content) {
            if let Err(e) = repository.put(&companion, digest).await {
                self.roll_back(repository, location, &written).await;
                self.evict(repository, &affected_indexes(location, false));
                return Err(e);
            }
            written.push(companion);
        }

        self.evict(repository, &affected_indexes(location, false));
        info!(
            repository = %repository.name(),
            location = %location,
            size = content.len(),
            redeploy = is_redeploy,
            "Artifact deployed"
        );
        Ok(details)
    }

    async fn roll_back(
        &self,
        repository: &Repository,
        location: &Location,
        companions: &[Location],
    ) {
        for target in companions.iter().chain(std::iter::once(location)) {
            match repository.remove(target).await {
                Ok(()) | Err(AppError::NotFound(_)) => {}
                Err(e) => self.sink.report(
                    &format!("roll back {}", repository.storage_path(target)),
                    &e.report_context(),
                ),
            }
        }
        warn!(repository = %repository.name(), location = %location, "Deploy rolled back");
    }

    /// Remove a file with its checksums, or a directory with everything below it.
    pub async fn delete(
        &self,
        identity: Option<&Identity>,
        repository: &str,
        gav: &str,
    ) -> AppResult<()> {
        let snapshot = self.registry.snapshot();
        let repository = snapshot.get(repository)?;
        let location = repository.relativize(gav)?;
        if location.is_root() {
            return Err(AppError::BadRequest(
                "Cannot delete the repository root".to_string(),
            ));
        }
        self.authorize(&snapshot, &repository, &location, AccessMethod::Delete, identity)?;

        let result = self.delete_in(&repository, &location).await;
        self.reported(|| format!("delete {}", repository.storage_path(&location)), result)
    }

    async fn delete_in(&self, repository: &Repository, location: &Location) -> AppResult<()> {
        let details = repository.details(location).await?;
        let is_directory = details.is_directory();
        let indexes = affected_indexes(location, is_directory);

        // Evicted before and after the removal: a generation that listed the removed
        // contents then neither caches nor keeps its document.
        self.evict(repository, &indexes);
        repository.remove(location).await?;
        if !is_directory {
            for companion in checksum::companion_locations(location) {
                remove_if_present(repository, &companion).await?;
            }
        }
        self.evict(repository, &indexes);
        for index in &indexes {
            self.generator.discard(repository, index).await?;
        }

        info!(
            repository = %repository.name(),
            location = %location,
            directory = is_directory,
            "Artifact deleted"
        );
        Ok(())
    }

    /// Direct children of a directory.
    pub async fn list(
        &self,
        identity: Option<&Identity>,
        repository: &str,
        path: &str,
    ) -> AppResult<Vec<FileDetails>> {
        let snapshot = self.registry.snapshot();
        let repository = snapshot.get(repository)?;
        let location = repository.relativize(path)?;
        self.authorize(&snapshot, &repository, &location, AccessMethod::List, identity)?;

        let result = repository
            .list_details(&location)
            .await
            .map(|entries| entries.into_iter().map(|(_, details)| details).collect());
        self.reported(|| format!("list {}", repository.storage_path(&location)), result)
    }

    /// Latest version of the artifact at `artifact_path` (`group/path/artifactId`).
    pub async fn latest_version(
        &self,
        identity: Option<&Identity>,
        repository: &str,
        artifact_path: &str,
    ) -> AppResult<String> {
        let (directory, metadata) = self
            .artifact_metadata(identity, repository, artifact_path)
            .await?;
        metadata
            .versioning
            .latest
            .ok_or_else(|| AppError::NotFound(format!("No versions of {directory}")))
    }

    /// All versions of the artifact at `artifact_path`, oldest first.
    pub async fn versions(
        &self,
        identity: Option<&Identity>,
        repository: &str,
        artifact_path: &str,
    ) -> AppResult<Vec<String>> {
        let (_, metadata) = self
            .artifact_metadata(identity, repository, artifact_path)
            .await?;
        Ok(metadata.versioning.versions)
    }

    async fn artifact_metadata(
        &self,
        identity: Option<&Identity>,
        repository: &str,
        artifact_path: &str,
    ) -> AppResult<(Location, Metadata)> {
        let snapshot = self.registry.snapshot();
        let repository = snapshot.get(repository)?;
        let directory = repository.relativize(artifact_path)?;
        self.authorize(&snapshot, &repository, &directory, AccessMethod::Read, identity)?;

        let index = directory.join(METADATA_FILE)?;
        let result = self.generator.metadata_for(&repository, &index).await;
        let metadata = self.reported(
            || format!("versions {}", repository.storage_path(&directory)),
            result,
        )?;
        Ok((directory, metadata))
    }
}

async fn remove_if_present(repository: &Repository, location: &Location) -> AppResult<()> {
    match repository.remove(location).await {
        Ok(()) | Err(AppError::NotFound(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAll;
    use crate::config::RepositoryConfig;
    use crate::failure::RecordingFailureSink;
    use crate::repository::Visibility;
    use crate::storage::{
        ObjectStorage, StorageBackend, StorageConfig, StorageError, StorageResult,
    };
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    const JAR: &str = "com/example/lib/1.0/lib-1.0.jar";
    const INDEX: &str = "com/example/lib/maven-metadata.xml";

    fn memory_config() -> Config {
        let mut config = Config::default();
        for repository in &mut config.repositories {
            repository.storage = StorageConfig::Memory;
        }
        config
    }

    async fn service() -> ArtifactService {
        ArtifactService::new(memory_config(), Collaborators::default())
            .await
            .unwrap()
    }

    fn deployer() -> Identity {
        Identity::new("deployer")
    }

    async fn deploy(
        service: &ArtifactService,
        repository: &str,
        path: &str,
        content: &'static [u8],
    ) {
        service
            .deploy(Some(&deployer()), repository, path, Bytes::from_static(content))
            .await
            .unwrap();
    }

    fn text(resolved: ResolvedArtifact) -> String {
        String::from_utf8(resolved.content.unwrap().to_vec()).unwrap()
    }

    /// In-memory backend that can fail one write and slow down directory listings.
    #[derive(Debug)]
    struct TestStorage {
        inner: ObjectStorage,
        writes: AtomicUsize,
        fail_write: Option<usize>,
        list_delay_ms: AtomicU64,
    }

    impl TestStorage {
        fn new(fail_write: Option<usize>) -> Self {
            Self {
                inner: ObjectStorage::in_memory(),
                writes: AtomicUsize::new(0),
                fail_write,
                list_delay_ms: AtomicU64::new(0),
            }
        }

        fn slow_listings(&self, delay: Duration) {
            let millis = u64::try_from(delay.as_millis()).unwrap();
            self.list_delay_ms.store(millis, Ordering::SeqCst);
        }
    }

    #[async_trait::async_trait]
    impl StorageBackend for TestStorage {
        fn kind(&self) -> &'static str {
            "test"
        }

        async fn put(&self, location: &Location, content: Bytes) -> StorageResult<FileDetails> {
            let write = self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail_write == Some(write) {
                return Err(StorageError::InvalidConfig("disk on fire".to_string()));
            }
            self.inner.put(location, content).await
        }

        async fn get(&self, location: &Location) -> StorageResult<Bytes> {
            self.inner.get(location).await
        }

        async fn details(&self, location: &Location) -> StorageResult<FileDetails> {
            self.inner.details(location).await
        }

        async fn remove(&self, location: &Location) -> StorageResult<()> {
            self.inner.remove(location).await
        }

        async fn list(&self, location: &Location) -> StorageResult<Vec<Location>> {
            self.inner.list(location).await
        }

        async fn list_details(
            &self,
            location: &Location,
        ) -> StorageResult<Vec<(Location, FileDetails)>> {
            let entries = self.inner.list_details(location).await?;
            let delay = self.list_delay_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(entries)
        }

        async fn usage(&self) -> StorageResult<u64> {
            self.inner.usage().await
        }
    }

    /// Service over a single repository named `test`, open to everyone.
    fn service_over(
        backend: Arc<dyn StorageBackend>,
        sink: Arc<RecordingFailureSink>,
    ) -> ArtifactService {
        let repository = Repository::with_backend(
            &RepositoryConfig::new("test", Visibility::Public),
            backend,
            Vec::new(),
        );
        ArtifactService::from_repositories(
            RepositorySet::from_repositories(vec![repository], Arc::new(Config::default()), 1),
            16,
            Collaborators {
                gate: Some(Arc::new(AllowAll)),
                sink,
                ..Collaborators::default()
            },
        )
    }

    #[tokio::test]
    async fn test_deploy_then_lookup_round_trip() {
        let service = service().await;
        let content = Bytes::from_static(b"jar-bytes");

        let details = service
            .deploy(Some(&deployer()), "releases", JAR, content.clone())
            .await
            .unwrap();
        assert_eq!(details.content_length, content.len() as u64);

        let resolved = service.lookup(None, "releases", JAR).await.unwrap();
        assert_eq!(resolved.content, Some(content.clone()));
        assert_eq!(resolved.details.content_length, content.len() as u64);

        let sha1 = service
            .lookup(None, "releases", &format!("{JAR}.sha1"))
            .await
            .unwrap();
        assert_eq!(
            sha1.content.unwrap(),
            Bytes::from(checksum::sha1_hash(&content))
        );
    }

    #[tokio::test]
    async fn test_redeploy_policy() {
        let service = service().await;
        deploy(&service, "releases", JAR, b"v1").await;

        let again = service
            .deploy(Some(&deployer()), "releases", JAR, Bytes::from_static(b"v2"))
            .await;
        assert!(matches!(again, Err(AppError::Forbidden(_))));

        // Index documents and checksums are re-uploaded on every deploy.
        for extra in [INDEX, "com/example/lib/1.0/lib-1.0.jar.sha1"] {
            for _ in 0..2 {
                deploy(&service, "releases", extra, b"x").await;
            }
        }

        let snapshots = "com/example/lib/1.1-SNAPSHOT/lib-1.1-SNAPSHOT.jar";
        for _ in 0..2 {
            deploy(&service, "snapshots", snapshots, b"s").await;
        }
    }

    #[tokio::test]
    async fn test_anonymous_writes_are_rejected() {
        let service = service().await;
        let result = service
            .deploy(None, "releases", JAR, Bytes::from_static(b"x"))
            .await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
        assert!(matches!(
            service.lookup(None, "private", "com/example").await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_path_traversal_is_rejected() {
        let service = service().await;
        for path in ["../private/secret.jar", "com\\example", "C:/Windows/win.ini"] {
            assert!(matches!(
                service.lookup(None, "releases", path).await,
                Err(AppError::BadRequest(_))
            ));
            assert!(matches!(
                service
                    .deploy(Some(&deployer()), "releases", path, Bytes::from_static(b"x"))
                    .await,
                Err(AppError::BadRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_index_reflects_deploy_and_delete() {
        let service = service().await;
        deploy(&service, "releases", JAR, b"a").await;

        let first = text(service.lookup(None, "releases", INDEX).await.unwrap());
        assert!(first.contains("<latest>1.0</latest>"));

        deploy(&service, "releases", "com/example/lib/2.0/lib-2.0.jar", b"b").await;
        let second = text(service.lookup(None, "releases", INDEX).await.unwrap());
        assert!(second.contains("<latest>2.0</latest>"));

        service
            .delete(Some(&deployer()), "releases", "com/example/lib/2.0")
            .await
            .unwrap();
        let third = text(service.lookup(None, "releases", INDEX).await.unwrap());
        assert!(third.contains("<latest>1.0</latest>"));
        assert!(!third.contains("2.0"));
    }

    #[tokio::test]
    async fn test_index_checksum_matches_current_document() {
        let service = service().await;
        deploy(&service, "releases", JAR, b"a").await;
        service.lookup(None, "releases", INDEX).await.unwrap();
        deploy(&service, "releases", "com/example/lib/1.1/lib-1.1.jar", b"b").await;

        let sha1 = service
            .lookup(None, "releases", &format!("{INDEX}.sha1"))
            .await
            .unwrap();
        let index = service.lookup(None, "releases", INDEX).await.unwrap();
        assert_eq!(
            sha1.content.unwrap(),
            Bytes::from(checksum::sha1_hash(&index.content.unwrap()))
        );
    }

    #[tokio::test]
    async fn test_delete_removes_checksums_and_persisted_indexes() {
        let service = service().await;
        deploy(&service, "releases", JAR, b"a").await;
        service.lookup(None, "releases", INDEX).await.unwrap();

        service.delete(Some(&deployer()), "releases", JAR).await.unwrap();

        let repository = service.repositories().get("releases").unwrap();
        for leftover in [
            JAR,
            "com/example/lib/1.0/lib-1.0.jar.md5",
            INDEX,
            "com/example/lib/maven-metadata.xml.sha1",
        ] {
            assert!(
                !repository.exists(&Location::parse(leftover).unwrap()).await,
                "{leftover} survived the delete"
            );
        }
        assert!(matches!(
            service.delete(Some(&deployer()), "releases", JAR).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_during_index_generation_leaves_no_stale_index() {
        let backend = Arc::new(TestStorage::new(None));
        let sink = Arc::new(RecordingFailureSink::new());
        let service = Arc::new(service_over(backend.clone(), sink));
        service
            .deploy(None, "test", JAR, Bytes::from_static(b"a"))
            .await
            .unwrap();

        backend.slow_listings(Duration::from_millis(300));
        let racing = tokio::spawn({
            let service = Arc::clone(&service);
            async move { service.lookup(None, "test", INDEX).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        service.delete(None, "test", "com/example/lib").await.unwrap();
        backend.slow_listings(Duration::ZERO);

        // The racing lookup listed the old contents; it may answer with them once.
        racing.await.unwrap().unwrap();

        assert!(matches!(
            service.lookup(None, "test", INDEX).await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            service.lookup(None, "test", &format!("{INDEX}.sha1")).await,
            Err(AppError::NotFound(_))
        ));
        assert!(!backend.inner.exists(&Location::parse(INDEX).unwrap()).await);
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_persisted_index_without_contents_is_not_served() {
        let backend = Arc::new(TestStorage::new(None));
        let service = service_over(backend.clone(), Arc::new(RecordingFailureSink::new()));
        backend
            .inner
            .put(&Location::parse(INDEX).unwrap(), Bytes::from_static(b"<metadata/>"))
            .await
            .unwrap();

        assert!(matches!(
            service.lookup(None, "test", INDEX).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_quota_and_size_limits() {
        let mut config = memory_config();
        config.repositories[0].quota_bytes = Some(4);
        config.mirrors.max_artifact_size_mb = 1;
        let service = ArtifactService::new(config, Collaborators::default())
            .await
            .unwrap();

        let too_big = Bytes::from(vec![0u8; 1024 * 1024 + 1]);
        assert!(matches!(
            service
                .deploy(Some(&deployer()), "snapshots", "a/b/1/b-1.jar", too_big)
                .await,
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            service
                .deploy(
                    Some(&deployer()),
                    "releases",
                    "a/b/1/b-1.jar",
                    Bytes::from_static(b"12345")
                )
                .await,
            Err(AppError::QuotaExceeded(_))
        ));
    }

    #[tokio::test]
    async fn test_list_and_latest_version() {
        let service = service().await;
        for path in [JAR, "com/example/lib/1.2/lib-1.2.jar"] {
            deploy(&service, "releases", path, b"x").await;
        }

        let names: Vec<String> = service
            .list(None, "releases", "com/example/lib")
            .await
            .unwrap()
            .into_iter()
            .map(|details| details.name)
            .collect();
        assert_eq!(names, vec!["1.0", "1.2"]);

        assert_eq!(
            service
                .latest_version(None, "releases", "com/example/lib")
                .await
                .unwrap(),
            "1.2"
        );
        assert_eq!(
            service
                .versions(None, "releases", "com/example/lib")
                .await
                .unwrap(),
            vec!["1.0", "1.2"]
        );
    }

    #[tokio::test]
    async fn test_unknown_repository_and_missing_artifact() {
        let service = service().await;
        assert!(matches!(
            service.lookup(None, "nope", "com/example").await,
            Err(AppError::NotFound(_))
        ));
        assert!(matches!(
            service.lookup(None, "releases", "com/example/none.jar").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reload_swaps_repositories_and_purges_cache() {
        let service = service().await;
        deploy(&service, "releases", JAR, b"a").await;
        service.lookup(None, "releases", INDEX).await.unwrap();
        assert_eq!(service.cache().len(), 1);

        let mut config = Config::default();
        let mut staging = RepositoryConfig::new("staging", Visibility::Hidden);
        staging.storage = StorageConfig::Memory;
        config.repositories = vec![staging];
        service.reload(config).await.unwrap();

        assert!(service.cache().is_empty());
        assert_eq!(service.repositories().names(), vec!["staging"]);
        assert_eq!(service.repositories().generation(), 2);
        assert!(matches!(
            service.lookup(None, "releases", "com").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_internal_failures_are_reported_not_leaked() {
        let sink = Arc::new(RecordingFailureSink::new());
        let service = service_over(Arc::new(TestStorage::new(Some(0))), sink.clone());

        let error = service
            .deploy(None, "test", JAR, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(error.is_internal());
        assert_eq!(error.to_string(), "Internal server error");

        let reports = sink.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0]
            .0
            .contains("repositories/test/com/example/lib/1.0/lib-1.0.jar"));
        assert!(reports[0].1.contains("disk on fire"));
    }

    #[tokio::test]
    async fn test_rollback_on_companion_failure() {
        // Accepts the artifact, fails its first checksum.
        let backend = Arc::new(TestStorage::new(Some(1)));
        let service = service_over(backend.clone(), Arc::new(RecordingFailureSink::new()));

        assert!(service
            .deploy(None, "test", JAR, Bytes::from_static(b"x"))
            .await
            .is_err());
        assert!(!backend.inner.exists(&Location::parse(JAR).unwrap()).await);
        assert_eq!(backend.inner.usage().await.unwrap(), 0);
    }
}
