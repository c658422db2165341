use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectMeta, ObjectStore};
use tracing::{debug, info};

use super::{FileDetails, StorageBackend, StorageError, StorageResult};
use crate::location::Location;

/// Repository storage on an [`ObjectStore`] (S3-compatible or in-memory).
///
/// Object stores have no real directories: a directory exists while at least one
/// object lives below its prefix.
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    inner: Arc<dyn ObjectStore>,
    prefix: Option<String>,
    kind: &'static str,
}

impl ObjectStorage {
    /// In-memory storage, for tests and throwaway repositories.
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
            prefix: None,
            kind: "memory",
        }
    }

    /// S3-compatible storage, with every key placed below `prefix`.
    pub fn s3(
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        bucket: &str,
        region: Option<&str>,
        prefix: &str,
    ) -> StorageResult<Self> {
        let store = AmazonS3Builder::new()
            .with_endpoint(endpoint)
            .with_access_key_id(access_key)
            .with_secret_access_key(secret_key)
            .with_bucket_name(bucket)
            .with_region(region.unwrap_or("us-east-1"))
            .with_allow_http(endpoint.starts_with("http://"))
            .build()
            .map_err(|e| StorageError::InvalidConfig(e.to_string()))?;

        debug!(endpoint = %endpoint, bucket = %bucket, prefix = %prefix, "Opened S3 storage");
        Ok(Self {
            inner: Arc::new(store),
            prefix: Some(prefix.trim_matches('/').to_string()).filter(|p| !p.is_empty()),
            kind: "s3",
        })
    }

    fn object_path(&self, location: &Location) -> ObjectPath {
        match (&self.prefix, location.is_root()) {
            (None, _) => ObjectPath::from(location.as_str()),
            (Some(prefix), true) => ObjectPath::from(prefix.as_str()),
            (Some(prefix), false) => ObjectPath::from(format!("{prefix}/{location}")),
        }
    }

    fn list_prefix(&self, location: &Location) -> Option<ObjectPath> {
        if location.is_root() && self.prefix.is_none() {
            None
        } else {
            Some(self.object_path(location))
        }
    }

    fn child_location(parent: &Location, path: &ObjectPath) -> Option<Location> {
        let name = path.filename()?;
        parent.join(name).ok()
    }

    /// All objects below a directory prefix.
    async fn objects_below(&self, location: &Location) -> StorageResult<Vec<ObjectMeta>> {
        let prefix = self.list_prefix(location);
        let objects: Vec<ObjectMeta> = self.inner.list(prefix.as_ref()).try_collect().await?;
        Ok(objects)
    }

    fn newest(objects: &[ObjectMeta]) -> DateTime<Utc> {
        objects
            .iter()
            .map(|meta| meta.last_modified)
            .max()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

#[async_trait]
impl StorageBackend for ObjectStorage {
    fn kind(&self) -> &'static str {
        self.kind
    }

    async fn put(&self, location: &Location, content: Bytes) -> StorageResult<FileDetails> {
        let path = self.object_path(location);
        let size = content.len();
        // Object stores commit a put atomically: the object is either fully visible or absent.
        self.inner.put(&path, content.into()).await?;
        info!(location = %location, size = size, backend = self.kind, "Object stored");
        self.details(location).await
    }

    async fn get(&self, location: &Location) -> StorageResult<Bytes> {
        let path = self.object_path(location);
        match self.inner.get(&path).await {
            Ok(result) => Ok(result.bytes().await?),
            Err(object_store::Error::NotFound { .. }) => {
                Err(StorageError::NotFound(location.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn details(&self, location: &Location) -> StorageResult<FileDetails> {
        if !location.is_root() {
            match self.inner.head(&self.object_path(location)).await {
                Ok(meta) => {
                    return Ok(FileDetails::file(
                        location,
                        meta.size as u64,
                        meta.last_modified,
                    ))
                }
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        let objects = self.objects_below(location).await?;
        if objects.is_empty() && !location.is_root() {
            return Err(StorageError::NotFound(location.clone()));
        }
        Ok(FileDetails::directory(location, Self::newest(&objects)))
    }

    async fn remove(&self, location: &Location) -> StorageResult<()> {
        if !location.is_root() {
            let path = self.object_path(location);
            if self.inner.head(&path).await.is_ok() {
                self.inner.delete(&path).await?;
                info!(location = %location, backend = self.kind, "Object removed");
                return Ok(());
            }
        }

        let objects = self.objects_below(location).await?;
        if objects.is_empty() {
            return Err(StorageError::NotFound(location.clone()));
        }
        for meta in &objects {
            match self.inner.delete(&meta.location).await {
                Ok(()) | Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!(
            location = %location,
            objects = objects.len(),
            backend = self.kind,
            "Object prefix removed"
        );
        Ok(())
    }

    async fn list(&self, location: &Location) -> StorageResult<Vec<Location>> {
        Ok(self
            .list_details(location)
            .await?
            .into_iter()
            .map(|(child, _)| child)
            .collect())
    }

    async fn list_details(
        &self,
        location: &Location,
    ) -> StorageResult<Vec<(Location, FileDetails)>> {
        let prefix = self.list_prefix(location);
        let listing = self.inner.list_with_delimiter(prefix.as_ref()).await?;

        let mut entries = Vec::new();
        for meta in &listing.objects {
            if let Some(child) = Self::child_location(location, &meta.location) {
                let details = FileDetails::file(&child, meta.size as u64, meta.last_modified);
                entries.push((child, details));
            }
        }
        for common_prefix in &listing.common_prefixes {
            if let Some(child) = Self::child_location(location, common_prefix) {
                let objects = self.objects_below(&child).await?;
                let details = FileDetails::directory(&child, Self::newest(&objects));
                entries.push((child, details));
            }
        }

        if entries.is_empty() && !location.is_root() {
            return Err(StorageError::NotFound(location.clone()));
        }
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(entries)
    }

    async fn usage(&self) -> StorageResult<u64> {
        let objects = self.objects_below(&Location::root()).await?;
        Ok(objects.iter().map(|meta| meta.size as u64).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(raw: &str) -> Location {
        Location::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get_round_trip() {
        let storage = ObjectStorage::in_memory();
        let jar = location("com/example/lib/1.0/lib-1.0.jar");

        let details = storage
            .put(&jar, Bytes::from_static(b"jar-content"))
            .await
            .unwrap();
        assert_eq!(details.content_length, 11);
        assert_eq!(&storage.get(&jar).await.unwrap()[..], b"jar-content");
    }

    #[tokio::test]
    async fn test_directories_are_derived_from_prefixes() {
        let storage = ObjectStorage::in_memory();
        for path in [
            "com/example/lib/1.1/lib-1.1.jar",
            "com/example/lib/1.0/lib-1.0.jar",
            "com/example/lib/maven-metadata.xml",
        ] {
            storage
                .put(&location(path), Bytes::from_static(b"x"))
                .await
                .unwrap();
        }

        let entries = storage
            .list_details(&location("com/example/lib"))
            .await
            .unwrap();
        let names: Vec<_> = entries.iter().map(|(_, d)| d.name.as_str()).collect();
        assert_eq!(names, vec!["1.0", "1.1", "maven-metadata.xml"]);
        assert!(entries[0].1.is_directory());
        assert!(storage.is_directory(&location("com/example")).await);
        assert!(!storage.is_directory(&location("com/example/lib/maven-metadata.xml")).await);
    }

    #[tokio::test]
    async fn test_remove_prefix_and_missing() {
        let storage = ObjectStorage::in_memory();
        storage
            .put(&location("com/example/lib/1.0/a.jar"), Bytes::from_static(b"a"))
            .await
            .unwrap();
        storage
            .put(&location("com/example/lib/1.0/a.pom"), Bytes::from_static(b"b"))
            .await
            .unwrap();

        storage.remove(&location("com/example/lib/1.0")).await.unwrap();
        assert!(!storage.exists(&location("com/example/lib/1.0/a.jar")).await);
        assert!(matches!(
            storage.remove(&location("com/example/lib/1.0")).await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.get(&location("nope.jar")).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_usage_sums_object_sizes() {
        let storage = ObjectStorage::in_memory();
        assert_eq!(storage.usage().await.unwrap(), 0);
        storage
            .put(&location("a.bin"), Bytes::from(vec![1u8; 10]))
            .await
            .unwrap();
        storage
            .put(&location("b/c.bin"), Bytes::from(vec![1u8; 5]))
            .await
            .unwrap();
        assert_eq!(storage.usage().await.unwrap(), 15);
    }
}
