//! # Artifact Registry
//!
//! A Maven-style artifact repository engine. Clients store and retrieve versioned
//! build artifacts addressed by group/artifact/version paths; the registry keeps
//! synthetic index documents (`maven-metadata.xml`) consistent with what is stored
//! and falls back to upstream mirrors when a repository does not hold an artifact.
//!
//! ## Features
//!
//! - **Pluggable storage**: local file system, S3-compatible object storage, or memory
//! - **Generated indexes**: version and snapshot build listings, cached and invalidated on writes
//! - **Mirrors**: ordered upstream fallback with coalesced concurrent fetches
//! - **Policies**: visibility, deploy/redeploy rules and quotas per repository
//! - **Checksums**: `.md5`, `.sha1`, `.sha256` and `.sha512` companions for every stored file
//!
//! ## Key Modules
//!
//! - [`service`]: the [`ArtifactService`] facade (lookup, deploy, delete)
//! - [`repository`]: repositories and atomically swapped configuration snapshots
//! - [`storage`]: byte-level persistence backends
//! - [`metadata`]: index document model, generation and caching
//! - [`mirror`] / [`upstream`]: mirror traversal and the per-mirror HTTP client
//! - [`version`]: total ordering of version strings
//! - [`server`]: HTTP adapter for the wire protocol
//!
//! ## Usage
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use vm_artifact_registry::{ArtifactService, Collaborators, Config};
//! use vm_artifact_registry::auth::Identity;
//!
//! # async fn example() -> vm_artifact_registry::AppResult<()> {
//! let service = ArtifactService::new(Config::default(), Collaborators::default()).await?;
//! let deployer = Identity::new("ci");
//!
//! let jar = "com/example/lib/1.0/lib-1.0.jar";
//! service
//!     .deploy(Some(&deployer), "releases", jar, Bytes::from_static(b"jar"))
//!     .await?;
//! let index = service
//!     .lookup(None, "releases", "com/example/lib/maven-metadata.xml")
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod checksum;
pub mod clock;
pub mod config;
pub mod error;
pub mod failure;
pub mod location;
pub mod logging;
pub mod metadata;
pub mod mirror;
pub mod repository;
pub mod server;
pub mod service;
pub mod state;
pub mod storage;
pub mod upstream;
pub mod version;

// Re-export key types for convenience
pub use config::Config;
pub use error::{ApiErrorResponse, AppError, AppResult, ErrorCode};
pub use location::Location;
pub use repository::{Repository, Visibility};
pub use server::{build_router, run_server};
pub use service::{ArtifactService, Collaborators, ResolvedArtifact};
pub use state::{AppState, SuccessResponse};
pub use upstream::UpstreamClient;
