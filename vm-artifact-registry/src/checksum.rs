//! Checksum companions for stored artifacts and generated index documents

use bytes::Bytes;

use crate::location::Location;

/// Digest algorithms written next to every stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    pub const ALL: [ChecksumAlgorithm; 4] = [
        ChecksumAlgorithm::Md5,
        ChecksumAlgorithm::Sha1,
        ChecksumAlgorithm::Sha256,
        ChecksumAlgorithm::Sha512,
    ];

    /// File extension of the companion file, without the dot.
    pub fn extension(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha1 => "sha1",
            ChecksumAlgorithm::Sha256 => "sha256",
            ChecksumAlgorithm::Sha512 => "sha512",
        }
    }

    /// Algorithm whose companion files carry `extension`.
    pub fn from_extension(extension: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|algorithm| algorithm.extension() == extension)
    }

    /// Lowercase hexadecimal digest of `data`.
    pub fn digest(&self, data: &[u8]) -> String {
        match self {
            ChecksumAlgorithm::Md5 => {
                use md5::{Digest, Md5};
                format!("{:x}", Md5::digest(data))
            }
            ChecksumAlgorithm::Sha1 => sha1_hash(data),
            ChecksumAlgorithm::Sha256 => sha256_hash(data),
            ChecksumAlgorithm::Sha512 => {
                use sha2::{Digest, Sha512};
                format!("{:x}", Sha512::digest(data))
            }
        }
    }

    /// Location of the companion file for `location`.
    pub fn companion_of(&self, location: &Location) -> Option<Location> {
        let name = location.file_name()?;
        location
            .sibling(&format!("{name}.{}", self.extension()))
            .ok()
    }
}

/// Whether `location` is itself a checksum companion.
pub fn is_checksum_file(location: &Location) -> bool {
    location
        .extension()
        .and_then(ChecksumAlgorithm::from_extension)
        .is_some()
}

/// Companion files (location and content) for `content` stored at `location`.
///
/// Checksum files get no companions of their own.
pub fn companions(location: &Location, content: &[u8]) -> Vec<(Location, Bytes)> {
    if is_checksum_file(location) {
        return Vec::new();
    }
    ChecksumAlgorithm::ALL
        .iter()
        .filter_map(|algorithm| {
            let companion = algorithm.companion_of(location)?;
            Some((companion, Bytes::from(algorithm.digest(content))))
        })
        .collect()
}

/// Companion locations for `location`, whether they exist or not.
pub fn companion_locations(location: &Location) -> Vec<Location> {
    if is_checksum_file(location) {
        return Vec::new();
    }
    ChecksumAlgorithm::ALL
        .iter()
        .filter_map(|algorithm| algorithm.companion_of(location))
        .collect()
}

/// Calculate SHA256 hash of data.
///
/// ```
/// # use vm_artifact_registry::checksum::sha256_hash;
/// let hash = sha256_hash(b"hello world");
/// assert_eq!(hash.len(), 64); // SHA256 produces 64 hex characters
/// ```
pub fn sha256_hash(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Calculate SHA1 hash of data.
///
/// ```
/// # use vm_artifact_registry::checksum::sha1_hash;
/// let hash = sha1_hash(b"hello world");
/// assert_eq!(hash.len(), 40); // SHA1 produces 40 hex characters
/// ```
pub fn sha1_hash(data: &[u8]) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
