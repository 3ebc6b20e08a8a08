// src/version.rs

//! Version comparison for package version strings
//!
//! Versions are dotted/dashed runs like `1.2-3` or `20240722223041-1`.
//! They are compared as integer sequences, not as semver: split on `.` and
//! `-`, drop anything non-numeric, then compare element-wise with the
//! shorter sequence ordering first.

use std::cmp::Ordering;

/// Split a version string into its ordered numeric components.
///
/// Non-numeric segments are discarded, so malformed input degrades to a
/// shorter (possibly empty) sequence instead of failing.
pub fn split_version(version: &str) -> Vec<u64> {
    version
        .split(['.', '-'])
        .filter_map(|part| part.parse::<u64>().ok())
        .collect()
}

/// Compare two version strings component-wise.
///
/// The first differing component decides; a strict prefix is smaller than
/// the longer sequence, and the empty sequence is smaller than everything.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    split_version(a).cmp(&split_version(b))
}
