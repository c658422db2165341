//! Common test utilities and helpers
//!
//! Shared setup for the integration tests: in-memory configurations, an HTTP test
//! server around the real router, and a fake upstream repository that counts the
//! requests it receives.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    Router,
};
use async_trait::async_trait;
use axum_test::TestServer;
use base64::{engine::general_purpose::STANDARD, Engine};
use url::Url;
use vm_artifact_registry::config::{Config, MirrorDefinition, RepositoryConfig};
use vm_artifact_registry::failure::RecordingFailureSink;
use vm_artifact_registry::repository::RepositorySet;
use vm_artifact_registry::storage::{
    FileDetails, ObjectStorage, StorageBackend, StorageConfig, StorageError, StorageResult,
};
use vm_artifact_registry::{
    build_router, AppState, ArtifactService, Collaborators, Location, Repository, UpstreamClient,
    Visibility,
};

/// Identity allowed to deploy in [`memory_config`].
pub const DEPLOYER: &str = "deployer";

/// Default repositories (`releases`, `snapshots`, `private`) on in-memory storage,
/// writable only by [`DEPLOYER`].
pub fn memory_config() -> Config {
    let mut config = Config::default();
    for repository in &mut config.repositories {
        repository.storage = StorageConfig::Memory;
    }
    config.security.deployers = vec![DEPLOYER.to_string()];
    config
}

/// A public in-memory repository named `proxy` backed by `mirrors`.
pub fn proxy_config(mirrors: Vec<MirrorDefinition>) -> Config {
    let mut proxy = RepositoryConfig::new("proxy", Visibility::Public);
    proxy.storage = StorageConfig::Memory;
    proxy.mirrors = mirrors;

    let mut config = memory_config();
    config.repositories.push(proxy);
    config
}

pub struct TestSetup {
    pub server: TestServer,
    pub service: Arc<ArtifactService>,
    pub sink: Arc<RecordingFailureSink>,
}

/// Build the service for `config` and an HTTP test server around the router.
pub async fn create_test_setup(config: Config) -> TestSetup {
    let sink = Arc::new(RecordingFailureSink::new());
    let collaborators = Collaborators {
        sink: sink.clone(),
        ..Collaborators::default()
    };
    let max_body_bytes = config.mirrors.max_artifact_size_bytes();
    let service = Arc::new(
        ArtifactService::new(config, collaborators)
            .await
            .expect("Failed to build service"),
    );
    let state = Arc::new(AppState {
        service: service.clone(),
        max_body_bytes,
    });
    let server = TestServer::new(build_router(state)).expect("Failed to create test server");

    TestSetup {
        server,
        service,
        sink,
    }
}

/// Service over a single public repository named `proxy` stored on `backend`.
pub fn proxy_service_over(
    backend: Arc<dyn StorageBackend>,
    mirrors: Vec<MirrorDefinition>,
) -> (Arc<ArtifactService>, Arc<RecordingFailureSink>) {
    let mirrors = mirrors
        .into_iter()
        .map(|definition| Arc::new(UpstreamClient::new(definition).expect("valid mirror")))
        .collect();
    let repository = Repository::with_backend(
        &RepositoryConfig::new("proxy", Visibility::Public),
        backend,
        mirrors,
    );
    let sink = Arc::new(RecordingFailureSink::new());
    let collaborators = Collaborators {
        sink: sink.clone(),
        ..Collaborators::default()
    };
    let repositories =
        RepositorySet::from_repositories(vec![repository], Arc::new(Config::default()), 1);
    let service = ArtifactService::from_repositories(repositories, 16, collaborators);
    (Arc::new(service), sink)
}

/// In-memory backend whose `fail_write`-th write (counting from zero) fails.
#[derive(Debug)]
pub struct FailingWrites {
    pub inner: ObjectStorage,
    writes: AtomicUsize,
    fail_write: usize,
}

impl FailingWrites {
    pub fn new(fail_write: usize) -> Self {
        Self {
            inner: ObjectStorage::in_memory(),
            writes: AtomicUsize::new(0),
            fail_write,
        }
    }
}

#[async_trait]
impl StorageBackend for FailingWrites {
    fn kind(&self) -> &'static str {
        "failing_writes"
    }

    async fn put(&self, location: &Location, content: Bytes) -> StorageResult<FileDetails> {
        if self.writes.fetch_add(1, Ordering::SeqCst) == self.fail_write {
            return Err(StorageError::InvalidConfig("disk full".to_string()));
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

    async fn usage(&self) -> StorageResult<u64> {
        self.inner.usage().await
    }
}

/// `Authorization` header carrying Basic credentials for `user`.
pub fn basic_auth(user: &str) -> HeaderValue {
    let encoded = STANDARD.encode(format!("{user}:secret"));
    HeaderValue::from_str(&format!("Basic {encoded}")).expect("valid header value")
}

/// File served by a [`FakeUpstream`].
#[derive(Clone)]
pub struct UpstreamFile {
    pub content_type: &'static str,
    pub content: Bytes,
}

impl UpstreamFile {
    pub fn new(content_type: &'static str, content: &'static [u8]) -> Self {
        Self {
            content_type,
            content: Bytes::from_static(content),
        }
    }
}

#[derive(Clone)]
struct UpstreamState {
    files: Arc<HashMap<String, UpstreamFile>>,
    heads: Arc<AtomicUsize>,
    gets: Arc<AtomicUsize>,
    delay: Duration,
}

/// Upstream repository served by axum on an ephemeral port.
pub struct FakeUpstream {
    pub url: Url,
    heads: Arc<AtomicUsize>,
    gets: Arc<AtomicUsize>,
}

impl FakeUpstream {
    /// Serve `files` (path without leading slash to file); every `GET` waits `delay`.
    pub async fn start(files: Vec<(&str, UpstreamFile)>, delay: Duration) -> Self {
        let state = UpstreamState {
            files: Arc::new(
                files
                    .into_iter()
                    .map(|(path, file)| (path.to_string(), file))
                    .collect(),
            ),
            heads: Arc::new(AtomicUsize::new(0)),
            gets: Arc::new(AtomicUsize::new(0)),
            delay,
        };
        let heads = state.heads.clone();
        let gets = state.gets.clone();

        let app = Router::new().fallback(serve_upstream).with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake upstream");
        let addr = listener.local_addr().expect("local address");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            url: Url::parse(&format!("http://{addr}/maven2/")).expect("valid url"),
            heads,
            gets,
        }
    }

    pub fn mirror(&self) -> MirrorDefinition {
        MirrorDefinition::new(self.url.clone())
    }

    pub fn heads(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

async fn serve_upstream(
    State(state): State<UpstreamState>,
    method: Method,
    uri: Uri,
) -> Response {
    if method == Method::HEAD {
        state.heads.fetch_add(1, Ordering::SeqCst);
    } else {
        state.gets.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(state.delay).await;
    }

    let path = uri.path().trim_start_matches("/maven2/");
    match state.files.get(path) {
        Some(file) => (
            [(header::CONTENT_TYPE, file.content_type)],
            file.content.clone(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
