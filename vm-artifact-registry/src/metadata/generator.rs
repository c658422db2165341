use std::collections::HashSet;
use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::{is_metadata_file, CachedIndex, Metadata, Snapshot, SnapshotVersion, Versioning};
use crate::checksum::{self, is_checksum_file};
use crate::clock::{format_timestamp, Clock};
use crate::error::{AppError, AppResult};
use crate::location::Location;
use crate::repository::Repository;
use crate::storage::FileDetails;
use crate::version::{base_version, compare_versions, is_snapshot, sort_descending};

/// Regex for timestamped snapshot build identifiers (`20240102.130000-2`)
static TIMESTAMPED_BUILD_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{8}\.\d{6})-(\d+)")
        .expect("Build identifier regex should compile - this is a static pattern")
});

/// One file of a snapshot version directory, split into its parts.
#[derive(Debug, PartialEq)]
struct BuildFile {
    identifier: String,
    classifier: Option<String>,
    extension: String,
}

impl BuildFile {
    /// Parse `{artifactId}-{base}-{identifier}[-{classifier}].{extension}`, where
    /// `prefix` is `{artifactId}-{base}-`.
    fn parse(name: &str, prefix: &str) -> Option<Self> {
        let rest = name.strip_prefix(prefix)?;

        let identifier = if let Some(found) = TIMESTAMPED_BUILD_REGEX.find(rest) {
            found.as_str()
        } else if rest.starts_with(crate::version::SNAPSHOT_QUALIFIER) {
            crate::version::SNAPSHOT_QUALIFIER
        } else {
            return None;
        };

        let remainder = &rest[identifier.len()..];
        let (classifier, extension) = if let Some(extension) = remainder.strip_prefix('.') {
            (None, extension)
        } else if let Some(classified) = remainder.strip_prefix('-') {
            let (classifier, extension) = classified.split_once('.')?;
            (Some(classifier.to_string()).filter(|c| !c.is_empty()), extension)
        } else {
            return None;
        };
        if extension.is_empty() {
            return None;
        }

        Some(Self {
            identifier: identifier.to_string(),
            classifier,
            extension: extension.to_string(),
        })
    }
}

/// Split a timestamped build identifier into `(timestamp, buildNumber)`.
fn split_build_identifier(identifier: &str) -> Option<(String, u32)> {
    let captures = TIMESTAMPED_BUILD_REGEX.captures(identifier)?;
    if captures.get(0)?.as_str().len() != identifier.len() {
        return None;
    }
    let build_number = captures.get(2)?.as_str().parse().ok()?;
    Some((captures.get(1)?.as_str().to_string(), build_number))
}

fn group_id_of(directory: Option<Location>) -> String {
    directory
        .map(|directory| directory.segments().collect::<Vec<_>>().join("."))
        .unwrap_or_default()
}

/// Builds index documents from repository contents.
///
/// A directory holding version subdirectories gets an artifact-level document
/// listing those versions. A directory holding only files is treated as a
/// snapshot version directory and gets a build-level document naming its newest
/// build.
pub struct MetadataGenerator {
    clock: Arc<dyn Clock>,
}

impl MetadataGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Generate, render and persist the index document at `location`.
    ///
    /// The rendered bytes and their checksum companions are written through the
    /// repository, so the document can also be served as a plain file. Nothing is
    /// persisted once `still_current` returns false, and a document that went
    /// out of date while it was written is removed again.
    pub async fn generate(
        &self,
        repository: &Repository,
        location: &Location,
        still_current: impl Fn() -> bool,
    ) -> AppResult<CachedIndex> {
        let metadata = self.metadata_for(repository, location).await?;

        let xml = metadata.to_xml().map_err(|e| {
            AppError::Internal(anyhow::anyhow!(
                "Failed to render index {}: {e}",
                repository.storage_path(location)
            ))
        })?;
        let content = Bytes::from(xml);

        if !still_current() {
            debug!(
                repository = %repository.name(),
                location = %location,
                "Index outdated before persisting"
            );
            let details = FileDetails::file(location, content.len() as u64, self.clock.now());
            return Ok(CachedIndex { details, content });
        }

        let persisted = self.persist(repository, location, &content).await;
        if !still_current() {
            debug!(
                repository = %repository.name(),
                location = %location,
                "Index outdated while persisting, removing it"
            );
            self.discard(repository, location).await?;
        }
        let details = persisted?;

        debug!(
            repository = %repository.name(),
            location = %location,
            size = content.len(),
            "Generated index document"
        );
        Ok(CachedIndex { details, content })
    }

    async fn persist(
        &self,
        repository: &Repository,
        location: &Location,
        content: &Bytes,
    ) -> AppResult<FileDetails> {
        let details = repository.put(location, content.clone()).await?;
        for (companion, digest) in checksum::companions(location, content) {
            repository.put(&companion, digest).await?;
        }
        Ok(details)
    }

    /// Remove a persisted index document and its checksums.
    pub async fn discard(&self, repository: &Repository, location: &Location) -> AppResult<()> {
        let targets =
            std::iter::once(location.clone()).chain(checksum::companion_locations(location));
        for target in targets {
            match repository.remove(&target).await {
                Ok(()) | Err(AppError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Build the document model for the index at `location` without persisting it.
    pub async fn metadata_for(
        &self,
        repository: &Repository,
        location: &Location,
    ) -> AppResult<Metadata> {
        if !is_metadata_file(location) {
            return Err(AppError::BadRequest(format!(
                "Not an index document: {}",
                location.file_name().unwrap_or_default()
            )));
        }

        let directory = location.parent().unwrap_or_default();
        if directory.is_root() {
            return Err(AppError::NotFound(format!(
                "No index at repository root of '{}'",
                repository.name()
            )));
        }

        let entries = repository.list_details(&directory).await?;
        if entries.iter().any(|(_, details)| details.is_directory()) {
            Self::artifact_level(&directory, &entries)
        } else {
            self.build_level(&directory, &entries)
        }
    }

    fn artifact_level(
        directory: &Location,
        entries: &[(Location, FileDetails)],
    ) -> AppResult<Metadata> {
        let mut versions: Vec<&FileDetails> = entries
            .iter()
            .map(|(_, details)| details)
            .filter(|details| details.is_directory())
            .collect();
        versions.sort_by(|a, b| compare_versions(&b.name, &a.name));

        let latest = versions
            .first()
            .ok_or_else(|| AppError::NotFound(format!("No versions in {directory}")))?;
        let release = versions
            .iter()
            .find(|details| !is_snapshot(&details.name))
            .map(|details| details.name.clone());

        Ok(Metadata {
            group_id: group_id_of(directory.parent()),
            artifact_id: directory.file_name().unwrap_or_default().to_string(),
            version: None,
            versioning: Versioning {
                latest: Some(latest.name.clone()),
                release,
                versions: versions.iter().rev().map(|d| d.name.clone()).collect(),
                last_updated: format_timestamp(latest.last_modified),
                ..Versioning::default()
            },
        })
    }

    fn build_level(
        &self,
        directory: &Location,
        entries: &[(Location, FileDetails)],
    ) -> AppResult<Metadata> {
        let version = directory.file_name().unwrap_or_default();
        let artifact_directory = directory.parent().unwrap_or_default();
        let artifact_id = artifact_directory.file_name().unwrap_or_default();
        let base = base_version(version);
        let prefix = format!("{artifact_id}-{base}-");

        let builds: Vec<BuildFile> = entries
            .iter()
            .filter(|(location, details)| {
                !details.is_directory()
                    && !is_metadata_file(location)
                    && !is_checksum_file(location)
            })
            .filter_map(|(_, details)| BuildFile::parse(&details.name, &prefix))
            .collect();

        let mut identifiers: Vec<&str> = builds.iter().map(|b| b.identifier.as_str()).collect();
        sort_descending(&mut identifiers);
        identifiers.dedup();
        let newest = *identifiers
            .first()
            .ok_or_else(|| AppError::NotFound(format!("No builds in {directory}")))?;

        let last_updated = format_timestamp(self.clock.now());
        let mut metadata = Metadata {
            group_id: group_id_of(artifact_directory.parent()),
            artifact_id: artifact_id.to_string(),
            version: Some(version.to_string()),
            versioning: Versioning {
                last_updated,
                ..Versioning::default()
            },
        };

        match split_build_identifier(newest) {
            Some((timestamp, build_number)) => {
                let updated = timestamp.replace('.', "");
                let value = format!("{base}-{newest}");
                let mut seen = HashSet::new();
                let mut snapshot_versions: Vec<SnapshotVersion> = builds
                    .iter()
                    .filter(|build| build.identifier == newest)
                    .filter(|build| {
                        seen.insert((build.classifier.clone(), build.extension.clone()))
                    })
                    .map(|build| SnapshotVersion {
                        classifier: build.classifier.clone(),
                        extension: build.extension.clone(),
                        value: value.clone(),
                        updated: updated.clone(),
                    })
                    .collect();
                snapshot_versions.sort_by(|a, b| {
                    (&a.extension, &a.classifier).cmp(&(&b.extension, &b.classifier))
                });

                metadata.versioning.snapshot = Some(Snapshot {
                    timestamp,
                    build_number,
                });
                metadata.versioning.snapshot_versions = snapshot_versions;
            }
            None => {
                let placeholder = format!("{base}-{}", crate::version::SNAPSHOT_QUALIFIER);
                metadata.versioning.latest = Some(placeholder.clone());
                metadata.versioning.versions = vec![placeholder];
            }
        }
        Ok(metadata)
    }
}
