// src/filesystem.rs

//! Filesystem primitives for the transaction engine
//!
//! This module provides the low-level operations every transaction is built
//! from:
//! - Recursive tree listing with package-relative, forward-slash paths
//! - Safe delete: rename to a `.treepkg_delete` staging name first, so a
//!   file held open by another process never aborts a transaction once its
//!   original name has been detached
//! - Metadata-preserving copy/move (mode + mtime)
//! - Empty-parent pruning that never removes the prefix root

use crate::error::{Error, Result};
use filetime::FileTime;
use std::path::{Component, Path};
use tracing::{trace, warn};
use walkdir::WalkDir;

/// Staging suffix appended when detaching a name for deletion.
pub const DELETE_SUFFIX: &str = ".treepkg_delete";

/// Upper bound on staging-name probing in [`try_delete`]. The rename target
/// is expected to be free on the first or second attempt; the cap only
/// guards against pathological trees full of stale staging entries.
const MAX_STAGING_ATTEMPTS: usize = 16;

/// Render a path with forward-slash separators.
///
/// Package-relative paths are stored and compared in this form on every
/// platform.
pub fn as_unix_path(path: &Path) -> String {
    let mut out = String::new();
    for component in path.components() {
        match component {
            Component::Prefix(p) => out.push_str(&p.as_os_str().to_string_lossy()),
            Component::RootDir => out.push('/'),
            c => {
                if !out.is_empty() && !out.ends_with('/') {
                    out.push('/');
                }
                out.push_str(&c.as_os_str().to_string_lossy());
            }
        }
    }
    out
}

/// List a tree recursively, returning `(directories, files)` as paths
/// relative to `base`, forward-slash separated, in deterministic pre-order.
pub fn recursive_listing(base: &str) -> Result<(Vec<String>, Vec<String>)> {
    let (mut dirs, mut files) = (Vec::new(), Vec::new());

    for entry in WalkDir::new(base).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(base)
            .map_err(|_| Error::InvalidPath(as_unix_path(entry.path())))?;
        let relative = as_unix_path(relative);
        if relative.is_empty() {
            continue;
        }
        if entry.file_type().is_dir() {
            trace!("listing D: {relative}");
            dirs.push(relative);
        } else {
            trace!("listing F: {relative}");
            files.push(relative);
        }
    }

    Ok((dirs, files))
}

/// Whether a directory contains no entries.
pub fn is_empty_dir(path: &Path) -> Result<bool> {
    Ok(path.read_dir()?.next().is_none())
}

/// Safely delete a file or directory that may be locked or held open.
///
/// The entry is first renamed to `<path>.treepkg_delete` (probing with
/// repeated `_delete` suffixes if that staging name is taken), detaching the
/// original name. The renamed entry is then removed best-effort: a failure
/// there is logged and left on disk rather than failing the transaction.
pub fn try_delete(path: &str) -> Result<()> {
    let Ok(meta) = std::fs::symlink_metadata(path) else {
        // already gone
        return Ok(());
    };
    let is_dir = meta.is_dir();

    let mut staging = format!("{path}{DELETE_SUFFIX}");
    let mut attempts = 0;
    while Path::new(&staging).exists() {
        // a stale staging entry may itself be removable by now
        if remove_entry(&staging, is_dir).is_ok() {
            break;
        }
        attempts += 1;
        if attempts >= MAX_STAGING_ATTEMPTS {
            return Err(Error::StagingExhausted(path.to_string()));
        }
        staging.push_str("_delete");
    }

    trace!("renaming {path} to {staging}");
    std::fs::rename(path, &staging)?;

    if let Err(err) = remove_entry(&staging, is_dir) {
        warn!("failed to remove {staging}: {err}");
    }

    Ok(())
}

fn remove_entry(path: &str, is_dir: bool) -> std::io::Result<()> {
    if is_dir {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Copy a file and carry over its permissions and modification time.
pub fn copy_with_metadata(from: &str, to: &str) -> Result<()> {
    std::fs::copy(from, to)?;
    let meta = std::fs::metadata(from)?;
    let mtime = FileTime::from_last_modification_time(&meta);
    filetime::set_file_times(to, mtime, mtime)?;
    Ok(())
}

/// Apply `src`'s permissions and modification time onto `dst`.
///
/// Used for directories, whose content is never copied wholesale.
pub fn apply_metadata(src: &str, dst: &str) -> Result<()> {
    let meta = std::fs::metadata(src)?;
    std::fs::set_permissions(dst, meta.permissions())?;
    let mtime = FileTime::from_last_modification_time(&meta);
    filetime::set_file_times(dst, mtime, mtime)?;
    Ok(())
}

/// Move a file into place, displacing any existing target via [`try_delete`].
///
/// Rename is attempted first; when the source and target sit on different
/// filesystems the move falls back to a metadata-preserving copy plus safe
/// delete of the source.
pub fn move_file(from: &str, to: &str) -> Result<()> {
    // the target may be held open by another process, detach its name first
    try_delete(to)?;
    if let Err(err) = std::fs::rename(from, to) {
        if matches!(
            err.kind(),
            std::io::ErrorKind::Unsupported | std::io::ErrorKind::CrossesDevices
        ) {
            copy_with_metadata(from, to)?;
            try_delete(from)?;
        } else {
            return Err(err.into());
        }
    }
    Ok(())
}

/// Delete `path`'s parent directory if it is now empty, unless the parent is
/// the prefix root itself. Pruning is per-call: it never cascades upward.
pub fn prune_empty_parent(path: &str, prefix: &str) -> Result<()> {
    let Some(parent) = Path::new(path).parent() else {
        return Ok(());
    };
    if parent == Path::new(prefix) || !parent.is_dir() {
        return Ok(());
    }
    if is_empty_dir(parent)? {
        let parent = as_unix_path(parent);
        trace!("DD {parent}");
        try_delete(&parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_unix_path() {
        assert_eq!(as_unix_path(Path::new("a/b/c")), "a/b/c");
        assert_eq!(as_unix_path(Path::new("single")), "single");
        #[cfg(unix)]
        assert_eq!(as_unix_path(Path::new("/tmp/x")), "/tmp/x");
    }

    #[test]
    fn test_recursive_listing() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().to_str().unwrap();

        std::fs::create_dir(format!("{base}/sub")).unwrap();
        std::fs::write(format!("{base}/sub/file"), "x\n").unwrap();
        std::fs::write(format!("{base}/top"), "y\n").unwrap();

        let (dirs, files) = recursive_listing(base).unwrap();
        assert_eq!(dirs, vec!["sub"]);
        assert_eq!(files, vec!["sub/file", "top"]);
    }

    #[test]
    fn test_recursive_listing_is_relative_to_base() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().to_str().unwrap();

        std::fs::create_dir_all(format!("{base}/prefix/test")).unwrap();
        std::fs::write(format!("{base}/prefix/test/new"), "x\n").unwrap();

        let (dirs, files) = recursive_listing(&format!("{base}/prefix")).unwrap();
        assert_eq!(dirs, vec!["test"]);
        assert_eq!(files, vec!["test/new"]);
    }

    #[test]
    fn test_is_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(is_empty_dir(tmp.path()).unwrap());
        std::fs::write(tmp.path().join("f"), "x").unwrap();
        assert!(!is_empty_dir(tmp.path()).unwrap());
    }

    #[test]
    fn test_try_delete_removes_file() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("victim");
        std::fs::write(&target, "x").unwrap();

        try_delete(target.to_str().unwrap()).unwrap();
        assert!(!target.exists());
        assert!(is_empty_dir(tmp.path()).unwrap());
    }

    #[test]
    fn test_try_delete_removes_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("subtree");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("inner"), "x").unwrap();

        try_delete(dir.to_str().unwrap()).unwrap();
        assert!(!dir.exists());
    }

    #[test]
    fn test_try_delete_missing_target_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("never-existed");
        assert!(try_delete(missing.to_str().unwrap()).is_ok());
    }

    #[test]
    fn test_try_delete_reclaims_stale_staging_entry() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("victim");
        std::fs::write(&target, "x").unwrap();
        // simulate a leftover from an earlier interrupted delete
        std::fs::write(
            tmp.path().join(format!("victim{DELETE_SUFFIX}")),
            "stale",
        )
        .unwrap();

        try_delete(target.to_str().unwrap()).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn test_move_file_replaces_target() {
        let tmp = tempfile::tempdir().unwrap();
        let from = tmp.path().join("src");
        let to = tmp.path().join("dst");
        std::fs::write(&from, "new").unwrap();
        std::fs::write(&to, "old").unwrap();

        move_file(from.to_str().unwrap(), to.to_str().unwrap()).unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read_to_string(&to).unwrap(), "new");
    }

    #[test]
    fn test_copy_with_metadata_preserves_mtime() {
        let tmp = tempfile::tempdir().unwrap();
        let from = tmp.path().join("src");
        let to = tmp.path().join("dst");
        std::fs::write(&from, "content").unwrap();
        filetime::set_file_times(
            &from,
            FileTime::from_unix_time(1_000_000, 0),
            FileTime::from_unix_time(1_000_000, 0),
        )
        .unwrap();

        copy_with_metadata(from.to_str().unwrap(), to.to_str().unwrap()).unwrap();

        let meta = std::fs::metadata(&to).unwrap();
        assert_eq!(
            FileTime::from_last_modification_time(&meta).unix_seconds(),
            1_000_000
        );
    }

    #[test]
    fn test_prune_empty_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let prefix = tmp.path().to_str().unwrap().to_string();
        std::fs::create_dir(format!("{prefix}/dir")).unwrap();

        prune_empty_parent(&format!("{prefix}/dir/gone"), &prefix).unwrap();
        assert!(!Path::new(&format!("{prefix}/dir")).exists());
    }

    #[test]
    fn test_prune_never_deletes_prefix_root() {
        let tmp = tempfile::tempdir().unwrap();
        let prefix = tmp.path().to_str().unwrap().to_string();

        prune_empty_parent(&format!("{prefix}/gone"), &prefix).unwrap();
        assert!(tmp.path().exists());
    }

    #[test]
    fn test_prune_keeps_nonempty_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let prefix = tmp.path().to_str().unwrap().to_string();
        std::fs::create_dir(format!("{prefix}/dir")).unwrap();
        std::fs::write(format!("{prefix}/dir/keep"), "x").unwrap();

        prune_empty_parent(&format!("{prefix}/dir/gone"), &prefix).unwrap();
        assert!(Path::new(&format!("{prefix}/dir/keep")).exists());
    }
}
