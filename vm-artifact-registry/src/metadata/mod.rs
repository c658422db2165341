//! # Index Documents
//!
//! Model and rendering of `maven-metadata.xml`, the per-artifact index that tells
//! build tools which versions exist and which snapshot build is current.
//!
//! Documents are generated from the repository contents by [`MetadataGenerator`] and
//! kept in a [`MetadataCache`] until a deploy or delete touches the artifact
//! directory they describe.

mod cache;
mod generator;

pub use cache::{CachedIndex, Generation, MetadataCache};
pub use generator::MetadataGenerator;

use askama::Template;

use crate::checksum::ChecksumAlgorithm;
use crate::location::Location;

/// File name of every index document.
pub const METADATA_FILE: &str = "maven-metadata.xml";

/// Whether `location` names an index document.
pub fn is_metadata_file(location: &Location) -> bool {
    location.file_name() == Some(METADATA_FILE)
}

/// The index document a checksum file belongs to, with the checksum's algorithm.
pub fn index_of_checksum(location: &Location) -> Option<(Location, ChecksumAlgorithm)> {
    let name = location.file_name()?;
    let (index_name, extension) = name.rsplit_once('.')?;
    if index_name != METADATA_FILE {
        return None;
    }
    let algorithm = ChecksumAlgorithm::from_extension(extension)?;
    Some((location.sibling(index_name).ok()?, algorithm))
}

/// Whether `location` is an index document or one of its checksums.
///
/// These are derived from the repository contents and never served from storage.
pub fn is_index_file(location: &Location) -> bool {
    is_metadata_file(location) || index_of_checksum(location).is_some()
}

/// Index document locations affected by a write at `location`.
///
/// `location` is the written file or the removed directory. The affected indexes are
/// the one of the enclosing directory (or the removed directory itself) and the one
/// a level up.
pub fn affected_indexes(location: &Location, is_directory: bool) -> Vec<Location> {
    let directory = if is_directory {
        Some(location.clone())
    } else {
        location.parent()
    };
    let Some(directory) = directory else {
        return Vec::new();
    };

    [Some(directory.clone()), directory.parent()]
        .into_iter()
        .flatten()
        .filter(|directory| !directory.is_root())
        .filter_map(|directory| directory.join(METADATA_FILE).ok())
        .collect()
}

/// Artifact index document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    pub group_id: String,
    pub artifact_id: String,
    pub version: Option<String>,
    pub versioning: Versioning,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Versioning {
    pub latest: Option<String>,
    pub release: Option<String>,
    /// Oldest first
    pub versions: Vec<String>,
    pub snapshot: Option<Snapshot>,
    pub snapshot_versions: Vec<SnapshotVersion>,
    /// `yyyyMMddHHmmss`
    pub last_updated: String,
}

/// Current timestamped build of a snapshot version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// `yyyyMMdd.HHmmss`
    pub timestamp: String,
    pub build_number: u32,
}

/// One file of the current snapshot build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotVersion {
    pub classifier: Option<String>,
    pub extension: String,
    pub value: String,
    pub updated: String,
}

#[derive(Template)]
#[template(path = "maven-metadata.xml")]
struct MetadataTemplate<'a> {
    metadata: &'a Metadata,
}

impl Metadata {
    /// Render the document as XML.
    pub fn to_xml(&self) -> Result<String, askama::Error> {
        MetadataTemplate { metadata: self }.render()
    }
}
