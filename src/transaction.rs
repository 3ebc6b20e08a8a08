// src/transaction.rs

//! Package transaction engine
//!
//! The four operations on a single package: install, update, remove and
//! merge-config. Each transaction extracts its archive into a scratch
//! directory, diffs the shipped file set against the installed record and
//! the live tree, and mutates the prefix one file at a time.
//!
//! Updates run a three-way comparison per file between the *original*
//! digest (from the old record), the *live* digest (current disk content)
//! and the *incoming* digest (newly extracted file). Protected paths whose
//! live content diverged from both sides are never overwritten; the
//! incoming file lands next to them as `<path>.treepkg_new`.
//!
//! Failures abort the current transaction immediately. Already-applied file
//! mutations are not rolled back; the scratch directory is always
//! discarded.

use crate::archive::{RESERVED_PREFIX, extract_archive, read_protected_manifest};
use crate::checksum::file_digest;
use crate::error::{Error, Result};
use crate::filesystem::{
    apply_metadata, as_unix_path, move_file, prune_empty_parent, recursive_listing, try_delete,
};
use crate::package::{file_name_from, split_name_version};
use crate::store::InstalledPackage;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, trace, warn};

/// Suffix for a live file saved aside before being overwritten.
pub const SAVE_SUFFIX: &str = ".treepkg_save";

/// Suffix under which a conflicting incoming file is installed.
pub const NEW_SUFFIX: &str = ".treepkg_new";

/// Suffix for a user-modified file kept when its package path goes away.
pub const BACKUP_SUFFIX: &str = ".treepkg_backup";

/// Interactive yes/no confirmation, injected so transaction logic is
/// testable without a terminal.
pub trait Confirm {
    fn confirm(&self, prompt: &str, default_yes: bool) -> Result<bool>;
}

/// External two-way merge tool invoked on a conflict artifact and its
/// canonical file.
pub trait MergeTool {
    fn merge(&self, current: &str, artifact: &str) -> Result<()>;
}

/// Per-file disposition during an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileAction {
    /// No live file at the target path; copy the incoming file in.
    Install,
    /// Replace the live file in place (safe delete, then copy).
    Overwrite,
    /// Leave the live file alone; land the incoming content under a
    /// `.treepkg_new` name for manual merging.
    SaveAsNew,
}

/// The update conflict policy, isolated from filesystem effects.
///
/// `original` is the digest recorded for this path by the old record (absent
/// when the path is new to this version), `live` the digest of current disk
/// content (absent when nothing exists at the target path), `incoming` the
/// digest of the newly shipped file.
pub fn resolve_file_action(
    protected: bool,
    original: Option<&str>,
    live: Option<&str>,
    incoming: &str,
) -> FileAction {
    let Some(live) = live else {
        return FileAction::Install;
    };
    if !protected {
        // not marked user-editable, upstream always wins
        return FileAction::Overwrite;
    }
    let Some(original) = original else {
        // protected path new to this version; a foreign live file was either
        // rejected in the precondition pass or adopted under --force
        return FileAction::Overwrite;
    };
    if live == original || live == incoming {
        FileAction::Overwrite
    } else {
        FileAction::SaveAsNew
    }
}

/// Extract `fn_zip` into a fresh scratch directory and enumerate its
/// contents, dropping reserved metadata entries from the file list.
fn materialize(
    fn_zip: &str,
    scratch_root: &str,
) -> Result<(tempfile::TempDir, String, Vec<String>, Vec<String>)> {
    let scratch = tempfile::Builder::new().tempdir_in(scratch_root)?;
    let scratch_path = as_unix_path(scratch.path());
    extract_archive(fn_zip, &scratch_path)?;

    let (dirs, mut files) = recursive_listing(&scratch_path)?;
    files.retain(|f| !f.starts_with(RESERVED_PREFIX));

    Ok((scratch, scratch_path, dirs, files))
}

/// Install a package archive into the prefix and return its fresh record.
///
/// Without `force`, any already-existing target path aborts before a single
/// file is touched. With `force`, pre-existing protected files are saved
/// aside as `<path>.treepkg_save` before being replaced.
pub fn install_package(
    fn_zip: &str,
    prefix: &str,
    force: bool,
    scratch_root: &str,
) -> Result<InstalledPackage> {
    let archive_name = file_name_from(fn_zip).unwrap_or_else(|| fn_zip.to_string());
    let (name, version) = split_name_version(&archive_name);
    info!("installing {name}-{version}");

    let (_scratch, scratch_path, dirs, files) = materialize(fn_zip, scratch_root)?;
    let protected = read_protected_manifest(&scratch_path)?;

    if !force {
        for f in &files {
            let target = format!("{prefix}/{f}");
            if Path::new(&target).exists() {
                return Err(Error::FileExists(target));
            }
        }
    }

    // directories first; pre-order listing guarantees parents before children
    for d in &dirs {
        let target_dir = format!("{prefix}/{d}");
        trace!("ID {d}");
        if !Path::new(&target_dir).exists() {
            std::fs::create_dir(&target_dir)?;
        }
        apply_metadata(&format!("{scratch_path}/{d}"), &target_dir)?;
    }

    let mut checksums = BTreeMap::new();
    for f in files {
        let source = format!("{scratch_path}/{f}");
        let digest = file_digest(&source)?;
        let target = format!("{prefix}/{f}");

        if Path::new(&target).exists() && protected.contains(&f) {
            info!("saving existing {target} as {target}{SAVE_SUFFIX}");
            move_file(&target, &format!("{target}{SAVE_SUFFIX}"))?;
        }
        trace!("IF {target}");
        move_file(&source, &target)?;
        checksums.insert(f, digest);
    }

    Ok(InstalledPackage {
        installed_at: None,
        version,
        checksums,
        protected,
    })
}

/// Update an installed package from a new archive and return the new record.
///
/// Reconciles three states per file (recorded digest, live content, incoming
/// content) according to [`resolve_file_action`], then removes files the new
/// version no longer ships, keeping user-modified protected ones as
/// `<path>.treepkg_backup`.
pub fn update_package(
    fn_zip: &str,
    name_old: &str,
    old: &InstalledPackage,
    prefix: &str,
    force: bool,
    scratch_root: &str,
) -> Result<InstalledPackage> {
    let archive_name = file_name_from(fn_zip).unwrap_or_else(|| fn_zip.to_string());
    let (name, version_new) = split_name_version(&archive_name);
    info!("updating {name_old}-{} -> {name}-{version_new}", old.version);

    let (_scratch, scratch_path, dirs, files) = materialize(fn_zip, scratch_root)?;

    // protection is sticky: the old record's set unions with the new manifest
    let mut protected = read_protected_manifest(&scratch_path)?;
    protected.extend(old.protected.iter().cloned());

    if !force {
        for f in &files {
            let target = format!("{prefix}/{f}");
            if Path::new(&target).exists() && !old.checksums.contains_key(f) {
                return Err(Error::ForeignFile(f.clone()));
            }
        }
    }

    for d in &dirs {
        let target_dir = format!("{prefix}/{d}");
        trace!("UD {target_dir}");
        if !Path::new(&target_dir).exists() {
            std::fs::create_dir(&target_dir)?;
        }
        // metadata propagation onto existing directories is best-effort
        if let Err(err) = apply_metadata(&format!("{scratch_path}/{d}"), &target_dir) {
            warn!("failed to carry directory metadata onto {target_dir}: {err}");
        }
    }

    let mut checksums = BTreeMap::new();
    for f in files {
        let source = format!("{scratch_path}/{f}");
        let incoming = file_digest(&source)?;
        let target = format!("{prefix}/{f}");

        let live = if Path::new(&target).exists() {
            Some(file_digest(&target)?)
        } else {
            None
        };
        let action = resolve_file_action(
            protected.contains(&f),
            old.checksums.get(&f).map(String::as_str),
            live.as_deref(),
            &incoming,
        );
        match action {
            FileAction::Install | FileAction::Overwrite => {
                trace!("UF {target}");
                move_file(&source, &target)?;
            }
            FileAction::SaveAsNew => {
                info!("{target} modified locally, installing new version as {target}{NEW_SUFFIX}");
                move_file(&source, &format!("{target}{NEW_SUFFIX}"))?;
            }
        }
        checksums.insert(f, incoming);
    }

    // files the new version no longer ships
    for (old_path, old_digest) in &old.checksums {
        if checksums.contains_key(old_path) {
            continue;
        }
        let target = format!("{prefix}/{old_path}");
        if !Path::new(&target).exists() {
            warn!("file {target} does not exist");
            continue;
        }
        if protected.contains(old_path) && file_digest(&target)? != *old_digest {
            // removed upstream but modified locally, keep the user's copy
            info!("saving changed {target} as {target}{BACKUP_SUFFIX}");
            move_file(&target, &format!("{target}{BACKUP_SUFFIX}"))?;
        } else {
            trace!("DF {target}");
            try_delete(&target)?;
            prune_empty_parent(&target, prefix)?;
        }
    }

    Ok(InstalledPackage {
        installed_at: None,
        version: version_new,
        checksums,
        protected,
    })
}

/// Remove every file an installed record claims to own.
///
/// Missing files are logged and skipped. User-modified protected files are
/// renamed to `<path>.treepkg_backup` instead of deleted. Emptied parent
/// directories are pruned, but the prefix root itself never is.
pub fn remove_package(package_name: &str, record: &InstalledPackage, prefix: &str) -> Result<()> {
    info!("removing {package_name}-{}", record.version);

    for (path, digest) in &record.checksums {
        let target = format!("{prefix}/{path}");
        if !Path::new(&target).exists() {
            warn!("file {target} does not exist");
            continue;
        }

        if record.protected.contains(path) && file_digest(&target)? != *digest {
            info!("{target} changed, saving as {target}{BACKUP_SUFFIX}");
            move_file(&target, &format!("{target}{BACKUP_SUFFIX}"))?;
        } else {
            trace!("DF {target}");
            try_delete(&target)?;
            prune_empty_parent(&target, prefix)?;
        }
    }

    Ok(())
}

/// Resolve outstanding conflict artifacts for a package's protected paths.
///
/// For each artifact suffix, if `<path><suffix>` exists next to the
/// canonical file, the injected merge tool runs on the pair; the artifact is
/// deleted only after the injected confirmation agrees. This is the one
/// place where a confirmation gates a filesystem mutation inside the
/// engine.
pub fn merge_config_package(
    package_name: &str,
    record: &InstalledPackage,
    prefix: &str,
    tool: &dyn MergeTool,
    confirm: &dyn Confirm,
) -> Result<()> {
    info!("merging configs for {package_name}");

    for path in &record.protected {
        let canonical = format!("{prefix}/{path}");
        for suffix in [BACKUP_SUFFIX, NEW_SUFFIX, SAVE_SUFFIX] {
            let artifact = format!("{canonical}{suffix}");
            if !Path::new(&artifact).exists() {
                continue;
            }
            info!("found {artifact}, running merge");
            tool.merge(&canonical, &artifact)?;
            if confirm.confirm(&format!("delete {artifact}?"), false)? {
                trace!("D {artifact}");
                std::fs::remove_file(&artifact)?;
            }
        }
    }

    Ok(())
}
