// src/package.rs

//! Package archive naming
//!
//! Archives follow `<name>-<version>.treepkg.zip` where `<version>` is an
//! optional trailing run of digits, dots and dashes (e.g. `6.3-1`). The name
//! is the non-greedy prefix before the earliest such run, so names may
//! themselves contain dashes and dots (`atx300-base-6.3-1.treepkg.zip`).
//!
//! This parse is the single source of truth for name/version pairs: the
//! repository listing, the installed-package store and the transaction
//! engine all go through it.

/// Suffix every package archive carries.
pub const ARCHIVE_SUFFIX: &str = ".treepkg.zip";

/// Split a package spec or archive file name into `(name, version)`.
///
/// The archive suffix is stripped if present. The version is the earliest
/// trailing dash-separated run consisting only of digits, dots and dashes;
/// if no such run exists the whole input is the name and the version is
/// empty.
pub fn split_name_version(spec: &str) -> (String, String) {
    let stem = spec.strip_suffix(ARCHIVE_SUFFIX).unwrap_or(spec);
    let bytes = stem.as_bytes();
    for i in 1..bytes.len() {
        if bytes[i] != b'-' {
            continue;
        }
        let rest = &stem[i + 1..];
        if !rest.is_empty()
            && rest
                .bytes()
                .all(|b| b.is_ascii_digit() || b == b'.' || b == b'-')
        {
            return (stem[..i].to_string(), rest.to_string());
        }
    }
    (stem.to_string(), String::new())
}

/// File-name component of a package locator (URL or filesystem path).
pub fn file_name_from(locator: &str) -> Option<String> {
    locator.rsplit('/').next().map(|s| s.to_string())
}

/// Package name parsed from a spec or archive file name.
pub fn package_name(spec: &str) -> String {
    split_name_version(spec).0
}

/// Package version parsed from a spec or archive file name.
pub fn package_version(spec: &str) -> String {
    split_name_version(spec).1
}

/// Whether a file name looks like a full package archive name
/// (`name-<version>-<release>.treepkg.zip`).
pub fn is_valid_archive_name(file_name: &str) -> bool {
    if !file_name.ends_with(ARCHIVE_SUFFIX) {
        return false;
    }
    let (name, version) = split_name_version(file_name);
    if name.is_empty() || version.is_empty() {
        return false;
    }
    // the version run must end in a dash-separated numeric release
    match version.rsplit_once('-') {
        Some((_, release)) => !release.is_empty() && release.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}
