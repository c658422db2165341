//! # Repository Locations
//!
//! [`Location`] is the only path type the storage layer accepts. It is a normalized,
//! slash-separated relative path: parsing rejects traversal attempts, drive letters,
//! backslashes, null bytes and control characters, and collapses repeated or
//! trailing separators. Once built, a location is immutable.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::AppError;

/// Maximum number of path segments accepted in a single location.
pub const MAX_PATH_DEPTH: usize = 64;

/// Maximum length of a single path segment.
pub const MAX_SEGMENT_LENGTH: usize = 255;

/// Reasons a raw path is refused before it can reach a backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("Path traversal detected: {path}")]
    PathTraversal { path: String },

    #[error("Drive letters are not allowed: {path}")]
    DriveLetter { path: String },

    #[error("Backslashes are not allowed: {path}")]
    Backslash { path: String },

    #[error("Path contains null bytes")]
    NullBytes,

    #[error("Path contains control characters")]
    ControlCharacters,

    #[error("Path depth exceeds maximum: {actual} > {max}")]
    TooDeep { actual: usize, max: usize },

    #[error("Path segment too long: {actual} > {max}")]
    SegmentTooLong { actual: usize, max: usize },
}

impl From<LocationError> for AppError {
    fn from(error: LocationError) -> Self {
        AppError::BadRequest(error.to_string())
    }
}

/// Regex for Windows drive letter prefixes
static DRIVE_LETTER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z]:")
        .expect("Drive letter regex should compile - this is a static pattern")
});

/// Normalized repository-relative path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Location(String);

impl Location {
    /// The empty location, addressing the root of a repository.
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Parse and normalize a raw path.
    ///
    /// # Examples
    ///
    /// ```
    /// # use vm_artifact_registry::location::Location;
    /// let location = Location::parse("/com//example/lib/").unwrap();
    /// assert_eq!(location.as_str(), "com/example/lib");
    /// assert!(Location::parse("com/../../etc/passwd").is_err());
    /// assert!(Location::parse("C:/Windows").is_err());
    /// assert!(Location::parse("com\\example").is_err());
    /// ```
    pub fn parse(raw: &str) -> Result<Self, LocationError> {
        if raw.contains('\0') {
            return Err(LocationError::NullBytes);
        }
        if raw.chars().any(|c| c.is_control()) {
            return Err(LocationError::ControlCharacters);
        }
        if raw.contains('\\') {
            return Err(LocationError::Backslash {
                path: raw.to_string(),
            });
        }
        if raw.contains("..") {
            return Err(LocationError::PathTraversal {
                path: raw.to_string(),
            });
        }

        let segments: Vec<&str> = raw
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();

        if segments
            .first()
            .is_some_and(|first| DRIVE_LETTER_REGEX.is_match(first))
        {
            return Err(LocationError::DriveLetter {
                path: raw.to_string(),
            });
        }
        if segments.len() > MAX_PATH_DEPTH {
            return Err(LocationError::TooDeep {
                actual: segments.len(),
                max: MAX_PATH_DEPTH,
            });
        }
        if let Some(segment) = segments.iter().find(|s| s.len() > MAX_SEGMENT_LENGTH) {
            return Err(LocationError::SegmentTooLong {
                actual: segment.len(),
                max: MAX_SEGMENT_LENGTH,
            });
        }

        Ok(Self(segments.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// Last path segment, `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        self.segments().last()
    }

    /// File extension of the last segment (text after the last `.`).
    pub fn extension(&self) -> Option<&str> {
        self.file_name()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, extension)| extension)
            .filter(|extension| !extension.is_empty())
    }

    /// Enclosing location, `None` for the root.
    pub fn parent(&self) -> Option<Location> {
        if self.is_root() {
            return None;
        }
        match self.0.rsplit_once('/') {
            Some((parent, _)) => Some(Self(parent.to_string())),
            None => Some(Self::root()),
        }
    }

    /// Append a relative path, validating the appended part.
    pub fn join(&self, child: &str) -> Result<Location, LocationError> {
        let child = Location::parse(child)?;
        Ok(self.join_location(&child))
    }

    pub fn join_location(&self, child: &Location) -> Location {
        match (self.is_root(), child.is_root()) {
            (true, _) => child.clone(),
            (false, true) => self.clone(),
            (false, false) => Self(format!("{}/{}", self.0, child.0)),
        }
    }

    /// Segment-wise prefix test (`com/ex` is not a prefix of `com/example`).
    pub fn starts_with(&self, prefix: &Location) -> bool {
        prefix.is_root()
            || self.0 == prefix.0
            || (self.0.starts_with(&prefix.0) && self.0[prefix.0.len()..].starts_with('/'))
    }

    /// Remove a segment-wise prefix.
    pub fn strip_prefix(&self, prefix: &Location) -> Option<Location> {
        if !self.starts_with(prefix) {
            return None;
        }
        if prefix.is_root() {
            return Some(self.clone());
        }
        Some(Self(
            self.0[prefix.0.len()..].trim_start_matches('/').to_string(),
        ))
    }

    /// Same directory, different file name.
    pub fn sibling(&self, file_name: &str) -> Result<Location, LocationError> {
        self.parent().unwrap_or_default().join(file_name)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Location {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl TryFrom<&str> for Location {
    type Error = LocationError;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Location::parse(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalizes_separators() {
        assert_eq!(
            Location::parse("//com///example/./lib//").unwrap().as_str(),
            "com/example/lib"
        );
        assert!(Location::parse("").unwrap().is_root());
        assert!(Location::parse("/").unwrap().is_root());
    }

    #[test]
    fn test_rejects_unsafe_paths() {
        assert!(matches!(
            Location::parse("com/../../etc/passwd"),
            Err(LocationError::PathTraversal { .. })
        ));
        assert!(matches!(
            Location::parse(".."),
            Err(LocationError::PathTraversal { .. })
        ));
        assert!(matches!(
            Location::parse("C:/Windows/system32"),
            Err(LocationError::DriveLetter { .. })
        ));
        assert!(matches!(
            Location::parse("/d:relative"),
            Err(LocationError::DriveLetter { .. })
        ));
        assert!(matches!(
            Location::parse("com\\example"),
            Err(LocationError::Backslash { .. })
        ));
        assert_eq!(
            Location::parse("com/null\0byte"),
            Err(LocationError::NullBytes)
        );
        assert_eq!(
            Location::parse("com/bell\x07"),
            Err(LocationError::ControlCharacters)
        );
    }

    #[test]
    fn test_rejects_excessive_depth() {
        let deep = vec!["a"; MAX_PATH_DEPTH + 1].join("/");
        assert!(matches!(
            Location::parse(&deep),
            Err(LocationError::TooDeep { .. })
        ));
    }

    #[test]
    fn test_parent_and_file_name() {
        let location = Location::parse("com/example/lib/1.0/lib-1.0.jar").unwrap();
        assert_eq!(location.file_name(), Some("lib-1.0.jar"));
        assert_eq!(location.extension(), Some("jar"));
        assert_eq!(location.parent().unwrap().as_str(), "com/example/lib/1.0");

        let top = Location::parse("com").unwrap();
        assert!(top.parent().unwrap().is_root());
        assert!(Location::root().parent().is_none());
    }

    #[test]
    fn test_prefix_is_segment_aware() {
        let location = Location::parse("com/example/lib").unwrap();
        assert!(location.starts_with(&Location::parse("com/example").unwrap()));
        assert!(!location.starts_with(&Location::parse("com/ex").unwrap()));
        assert_eq!(
            location
                .strip_prefix(&Location::parse("com").unwrap())
                .unwrap()
                .as_str(),
            "example/lib"
        );
        assert!(location
            .strip_prefix(&Location::parse("org").unwrap())
            .is_none());
    }

    #[test]
    fn test_join_validates_child() {
        let base = Location::parse("com/example").unwrap();
        assert_eq!(base.join("lib/1.0").unwrap().as_str(), "com/example/lib/1.0");
        assert!(base.join("../secret").is_err());
        assert_eq!(Location::root().join("com").unwrap().as_str(), "com");
    }
}
