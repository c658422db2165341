use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::{FileDetails, StorageBackend, StorageError, StorageResult};
use crate::location::Location;

const TEMP_SUFFIX: &str = ".part";

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Repository storage in a local directory.
#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    root: PathBuf,
}

impl FileSystemStorage {
    /// Open (and create if needed) the storage directory.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::io(&root, e))?;
        debug!(root = %root.display(), "Opened file system storage");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, location: &Location) -> PathBuf {
        if location.is_root() {
            self.root.clone()
        } else {
            self.root.join(location.as_str())
        }
    }

    fn not_found_or_io(location: &Location, path: &Path, error: std::io::Error) -> StorageError {
        if error.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(location.clone())
        } else {
            StorageError::io(path, error)
        }
    }

    fn temp_path(path: &Path) -> PathBuf {
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        path.with_file_name(format!(
            ".{file_name}.{}.{counter}{TEMP_SUFFIX}",
            std::process::id()
        ))
    }

    async fn write_durably(path: &Path, content: &[u8]) -> std::io::Result<()> {
        let temp_path = Self::temp_path(path);
        let result = async {
            let mut file = fs::File::create(&temp_path).await?;
            file.write_all(content).await?;
            file.sync_all().await?;
            drop(file);
            fs::rename(&temp_path, path).await
        }
        .await;

        if result.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        result?;

        // Persist the rename itself. Not supported on every platform.
        if let Some(parent) = path.parent() {
            let parent = parent.to_path_buf();
            let synced = tokio::task::spawn_blocking(move || {
                std::fs::File::open(&parent).and_then(|dir| dir.sync_all())
            })
            .await;
            if let Ok(Err(e)) = synced {
                debug!(error = %e, "Directory sync unsupported");
            }
        }
        Ok(())
    }
}

fn modified(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| DateTime::<Utc>::from(SystemTime::UNIX_EPOCH))
}

#[async_trait]
impl StorageBackend for FileSystemStorage {
    fn kind(&self) -> &'static str {
        "file_system"
    }

    async fn put(&self, location: &Location, content: Bytes) -> StorageResult<FileDetails> {
        let path = self.resolve(location);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }

        Self::write_durably(&path, &content)
            .await
            .map_err(|e| StorageError::io(&path, e))?;

        info!(
            location = %location,
            size = content.len(),
            "File saved successfully"
        );
        self.details(location).await
    }

    async fn get(&self, location: &Location) -> StorageResult<Bytes> {
        let path = self.resolve(location);
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found_or_io(location, &path, e))?;
        if metadata.is_dir() {
            return Err(StorageError::NotFound(location.clone()));
        }

        let content = fs::read(&path)
            .await
            .map_err(|e| Self::not_found_or_io(location, &path, e))?;
        Ok(Bytes::from(content))
    }

    async fn details(&self, location: &Location) -> StorageResult<FileDetails> {
        let path = self.resolve(location);
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found_or_io(location, &path, e))?;

        if metadata.is_dir() {
            Ok(FileDetails::directory(location, modified(&metadata)))
        } else {
            Ok(FileDetails::file(location, metadata.len(), modified(&metadata)))
        }
    }

    async fn remove(&self, location: &Location) -> StorageResult<()> {
        let path = self.resolve(location);
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found_or_io(location, &path, e))?;

        let result = if metadata.is_dir() {
            fs::remove_dir_all(&path).await
        } else {
            fs::remove_file(&path).await
        };
        result.map_err(|e| Self::not_found_or_io(location, &path, e))?;

        info!(location = %location, "Removed from file system storage");
        Ok(())
    }

    async fn list(&self, location: &Location) -> StorageResult<Vec<Location>> {
        let path = self.resolve(location);
        let mut entries = fs::read_dir(&path)
            .await
            .map_err(|e| Self::not_found_or_io(location, &path, e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&path, e))?
        {
            let name = entry.file_name().to_string_lossy().to_string();
            // In-progress writes
            if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            names.push(name);
        }
        names.sort();

        Ok(names
            .iter()
            .filter_map(|name| match location.join(name) {
                Ok(child) => Some(child),
                Err(e) => {
                    debug!(name = %name, error = %e, "Skipping entry with unsafe name");
                    None
                }
            })
            .collect())
    }

    async fn usage(&self) -> StorageResult<u64> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || {
            let mut total = 0u64;
            for entry in walkdir::WalkDir::new(&root) {
                let entry = entry.map_err(|e| {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                    StorageError::io(&path, e.into())
                })?;
                if entry.file_type().is_file() {
                    let metadata = entry
                        .metadata()
                        .map_err(|e| StorageError::io(entry.path(), e.into()))?;
                    total += metadata.len();
                }
            }
            Ok::<u64, StorageError>(total)
        })
        .await
        .map_err(|e| StorageError::io(&self.root, std::io::Error::other(e)))?
    }
}
