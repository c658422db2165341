//! # Storage Backends
//!
//! Byte-level persistence for a single repository. Every backend implements the
//! narrow [`StorageBackend`] contract (put, get, remove, list, details, usage) over
//! pre-validated [`Location`]s; the backend never sees raw user input.
//!
//! Three variants are selected at construction from [`StorageConfig`]:
//!
//! - [`FileSystemStorage`]: a directory on local disk, writes are fsynced and renamed
//!   into place
//! - [`ObjectStorage`] over S3-compatible object storage
//! - [`ObjectStorage`] over an in-memory store, used by tests and throwaway setups

mod file_system;
mod object;

pub use file_system::FileSystemStorage;
pub use object::ObjectStorage;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::location::Location;

/// Errors raised by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Not found: {0}")]
    NotFound(Location),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Invalid storage configuration: {0}")]
    InvalidConfig(String),
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Kind of entry a [`FileDetails`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileType {
    File,
    Directory,
}

/// Read model over a backend entry. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDetails {
    #[serde(rename = "type")]
    pub file_type: FileType,
    pub name: String,
    pub content_type: String,
    pub content_length: u64,
    pub last_modified: DateTime<Utc>,
}

impl FileDetails {
    pub fn file(location: &Location, content_length: u64, last_modified: DateTime<Utc>) -> Self {
        let name = location.file_name().unwrap_or_default().to_string();
        Self {
            file_type: FileType::File,
            content_type: content_type_for(&name).to_string(),
            name,
            content_length,
            last_modified,
        }
    }

    pub fn directory(location: &Location, last_modified: DateTime<Utc>) -> Self {
        Self {
            file_type: FileType::Directory,
            name: location.file_name().unwrap_or_default().to_string(),
            content_type: "application/octet-stream".to_string(),
            content_length: 0,
            last_modified,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.file_type == FileType::Directory
    }
}

/// Content type served for an artifact file name.
pub fn content_type_for(name: &str) -> &'static str {
    let extension = name.rsplit_once('.').map(|(_, ext)| ext).unwrap_or_default();
    match extension {
        "jar" | "war" | "ear" => "application/java-archive",
        "pom" | "xml" => "application/xml",
        "module" | "json" => "application/json",
        "md5" | "sha1" | "sha256" | "sha512" | "asc" => "text/plain",
        "html" | "htm" => "text/html",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Byte-level persistence for one repository.
///
/// Implementations must make writes durable before [`put`](StorageBackend::put)
/// returns and must never expose a half-written file under its final name.
#[async_trait]
pub trait StorageBackend: Send + Sync + fmt::Debug {
    /// Short backend identifier used in logs.
    fn kind(&self) -> &'static str;

    /// Store `content` at `location`, replacing any previous file.
    async fn put(&self, location: &Location, content: Bytes) -> StorageResult<FileDetails>;

    /// Read the full content of a file.
    async fn get(&self, location: &Location) -> StorageResult<Bytes>;

    /// Describe a file or directory.
    async fn details(&self, location: &Location) -> StorageResult<FileDetails>;

    /// Remove a file, or a directory with everything below it.
    async fn remove(&self, location: &Location) -> StorageResult<()>;

    /// Direct children of a directory, ordered by name.
    async fn list(&self, location: &Location) -> StorageResult<Vec<Location>>;

    /// Total number of bytes stored.
    async fn usage(&self) -> StorageResult<u64>;

    /// Details of the direct children of a directory, ordered by name.
    async fn list_details(
        &self,
        location: &Location,
    ) -> StorageResult<Vec<(Location, FileDetails)>> {
        let mut entries = Vec::new();
        for child in self.list(location).await? {
            match self.details(&child).await {
                Ok(details) => entries.push((child, details)),
                // Removed between listing and stat.
                Err(StorageError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(entries)
    }

    async fn exists(&self, location: &Location) -> bool {
        self.details(location).await.is_ok()
    }

    async fn is_directory(&self, location: &Location) -> bool {
        self.details(location)
            .await
            .map(|details| details.is_directory())
            .unwrap_or(false)
    }
}

/// Storage configuration of a single repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageConfig {
    /// Local filesystem, rooted at `path` or `{data_dir}/repositories/{name}`
    FileSystem {
        #[serde(default)]
        path: Option<PathBuf>,
    },

    /// In-memory storage (for testing)
    Memory,

    /// S3-compatible storage (AWS S3, MinIO, etc.)
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        access_key: String,
        secret_key: String,
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        #[serde(default)]
        region: Option<String>,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::FileSystem { path: None }
    }
}

/// Build the backend described by `config` for repository `name`.
pub async fn create_backend(
    config: &StorageConfig,
    data_dir: &Path,
    name: &str,
) -> StorageResult<Arc<dyn StorageBackend>> {
    let backend: Arc<dyn StorageBackend> = match config {
        StorageConfig::FileSystem { path } => {
            let root = path
                .clone()
                .unwrap_or_else(|| data_dir.join("repositories").join(name));
            Arc::new(FileSystemStorage::new(root).await?)
        }
        StorageConfig::Memory => Arc::new(ObjectStorage::in_memory()),
        StorageConfig::S3 {
            endpoint,
            access_key,
            secret_key,
            bucket,
            region,
        } => Arc::new(ObjectStorage::s3(
            endpoint,
            access_key,
            secret_key,
            bucket,
            region.as_deref(),
            &format!("repositories/{name}"),
        )?),
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("lib-1.0.jar"), "application/java-archive");
        assert_eq!(content_type_for("lib-1.0.pom"), "application/xml");
        assert_eq!(content_type_for("maven-metadata.xml"), "application/xml");
        assert_eq!(content_type_for("lib-1.0.jar.sha1"), "text/plain");
        assert_eq!(content_type_for("README"), "application/octet-stream");
    }

    #[test]
    fn test_storage_config_serde() {
        let config: StorageConfig = serde_json::from_str(r#"{"type": "memory"}"#).unwrap();
        assert_eq!(config, StorageConfig::Memory);

        let config: StorageConfig = serde_json::from_str(r#"{"type": "file_system"}"#).unwrap();
        assert_eq!(config, StorageConfig::FileSystem { path: None });

        let config: StorageConfig = serde_json::from_str(
            r#"{"type": "s3", "endpoint": "http://localhost:9000", "access_key": "a",
                "secret_key": "b", "bucket": "artifacts"}"#,
        )
        .unwrap();
        assert!(matches!(config, StorageConfig::S3 { region: None, .. }));
    }

    #[test]
    fn test_default_is_file_system_under_data_dir() {
        assert_eq!(StorageConfig::default(), StorageConfig::FileSystem { path: None });
    }

    #[tokio::test]
    async fn test_create_backend_file_system_default_root() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let backend = create_backend(
            &StorageConfig::default(),
            temp_dir.path(),
            "releases",
        )
        .await
        .unwrap();

        assert_eq!(backend.kind(), "file_system");
        assert!(temp_dir.path().join("repositories/releases").is_dir());
    }
}
