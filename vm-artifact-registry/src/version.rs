//! # Version Ordering
//!
//! A total order over arbitrary version strings, used to pick `latest` and
//! `release` in index documents and to rank snapshot build identifiers.
//!
//! Versions are split into components on `.`, `_` and `-`, then compared component
//! by component:
//!
//! - two numeric components compare by value (`1.20` > `1.05`), at any length
//! - a word component sorts below a numeric one (`word` < `0.5`, `1.1.pre.6` < `1.1_5`)
//! - two word components compare case-insensitively
//! - when one version runs out of components, the next component of the longer one
//!   decides: a number makes the longer version newer (`1.2` < `1.2.3-SNAPSHOT`),
//!   a word makes it older (`1.1.4-SNAPSHOT` < `1.1.4`)
//!
//! Versions that are equal under these rules fall back to plain string order, so
//! distinct strings never compare equal.

use std::cmp::Ordering;

/// Qualifier that marks a mutable pre-release build.
pub const SNAPSHOT_QUALIFIER: &str = "SNAPSHOT";

fn components(version: &str) -> impl Iterator<Item = &str> {
    version.split(['.', '_', '-'])
}

fn is_numeric(component: &str) -> bool {
    !component.is_empty() && component.bytes().all(|b| b.is_ascii_digit())
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn compare_components(a: &str, b: &str) -> Ordering {
    match (is_numeric(a), is_numeric(b)) {
        (true, true) => compare_numeric(a, b),
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.to_ascii_lowercase().cmp(&b.to_ascii_lowercase()),
    }
}

/// Compare two version strings.
///
/// ```
/// # use vm_artifact_registry::version::compare_versions;
/// # use std::cmp::Ordering;
/// assert_eq!(compare_versions("1.20", "1.05"), Ordering::Greater);
/// assert_eq!(compare_versions("1.1.4-SNAPSHOT", "1.1.4"), Ordering::Less);
/// assert_eq!(compare_versions("word", "0.5"), Ordering::Less);
/// ```
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let mut left = components(a);
    let mut right = components(b);

    loop {
        let ordering = match (left.next(), right.next()) {
            (Some(x), Some(y)) => compare_components(x, y),
            (Some(x), None) => {
                if is_numeric(x) {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            }
            (None, Some(y)) => {
                if is_numeric(y) {
                    Ordering::Less
                } else {
                    Ordering::Greater
                }
            }
            (None, None) => return a.cmp(b),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}

/// Sort versions oldest first.
pub fn sort_ascending<S: AsRef<str>>(versions: &mut [S]) {
    versions.sort_by(|a, b| compare_versions(a.as_ref(), b.as_ref()));
}

/// Sort versions newest first.
pub fn sort_descending<S: AsRef<str>>(versions: &mut [S]) {
    versions.sort_by(|a, b| compare_versions(b.as_ref(), a.as_ref()));
}

/// Whether a version (or build identifier) carries the snapshot qualifier.
pub fn is_snapshot(version: &str) -> bool {
    version
        .to_ascii_uppercase()
        .ends_with(SNAPSHOT_QUALIFIER)
}

/// Version without its `-SNAPSHOT` qualifier.
pub fn base_version(version: &str) -> &str {
    let suffix_len = SNAPSHOT_QUALIFIER.len() + 1;
    if version.len() > suffix_len && is_snapshot(version) {
        let (base, qualifier) = version.split_at(version.len() - suffix_len);
        if qualifier.starts_with('-') {
            return base;
        }
    }
    version
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(input: &[&str]) -> Vec<String> {
        let mut versions: Vec<String> = input.iter().map(|v| v.to_string()).collect();
        sort_ascending(&mut versions);
        versions
    }

    #[test]
    fn test_snapshots_and_words() {
        assert_eq!(
            sorted(&[
                "1.2.3-SNAPSHOT",
                "1.2",
                "0.5",
                "1.0",
                "1.1.5-SNAPSHOT",
                "word",
                "1.1.4",
                "1.1",
                "1.1.4-SNAPSHOT",
            ]),
            vec![
                "word",
                "0.5",
                "1.0",
                "1.1",
                "1.1.4-SNAPSHOT",
                "1.1.4",
                "1.1.5-SNAPSHOT",
                "1.2",
                "1.2.3-SNAPSHOT",
            ]
        );
    }

    #[test]
    fn test_numeric_runs_compare_by_value() {
        assert_eq!(
            sorted(&[
                "0.12",
                "1.00",
                "1.05",
                "1.12-SNAPSHOT",
                "1.12",
                "word",
                "1.20",
                "1.20.5-SNAPSHOT",
            ]),
            vec![
                "word",
                "0.12",
                "1.00",
                "1.05",
                "1.12-SNAPSHOT",
                "1.12",
                "1.20",
                "1.20.5-SNAPSHOT",
            ]
        );
    }

    #[test]
    fn test_mixed_separators_and_qualifiers() {
        assert_eq!(
            sorted(&[
                "1_0_1",
                "1.1_5_early_access",
                "1.0.2",
                "pre-1.12.5",
                "pre-1.12.5-SNAPSHOT",
                "1.1.pre.6",
                "2.6-SNAPSHOT",
                "1.1_7",
                "1.1_5",
            ]),
            vec![
                "pre-1.12.5-SNAPSHOT",
                "pre-1.12.5",
                "1_0_1",
                "1.0.2",
                "1.1.pre.6",
                "1.1_5_early_access",
                "1.1_5",
                "1.1_7",
                "2.6-SNAPSHOT",
            ]
        );
    }

    #[test]
    fn test_order_is_total() {
        assert_ne!(compare_versions("1.0", "1.00"), Ordering::Equal);
        assert_eq!(compare_versions("1.0", "1.0"), Ordering::Equal);
        assert_eq!(
            compare_versions("1.0", "1.00"),
            compare_versions("1.00", "1.0").reverse()
        );
    }

    #[test]
    fn test_long_numeric_runs() {
        assert_eq!(
            compare_versions("20240101.120000-12", "20240101.120000-9"),
            Ordering::Greater
        );
        assert_eq!(
            compare_versions("1.99999999999999999999999", "1.100000000000000000000000"),
            Ordering::Less
        );
    }

    #[test]
    fn test_sort_descending() {
        let mut versions = vec!["1.0", "2.0-SNAPSHOT", "1.5"];
        sort_descending(&mut versions);
        assert_eq!(versions, vec!["2.0-SNAPSHOT", "1.5", "1.0"]);
    }

    #[test]
    fn test_snapshot_helpers() {
        assert!(is_snapshot("1.0-SNAPSHOT"));
        assert!(is_snapshot("1.0-snapshot"));
        assert!(!is_snapshot("1.0"));
        assert_eq!(base_version("1.0-SNAPSHOT"), "1.0");
        assert_eq!(base_version("1.0"), "1.0");
        assert_eq!(base_version("SNAPSHOT"), "SNAPSHOT");
    }
}
