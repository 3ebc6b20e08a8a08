// src/store.rs

//! Installed-package store
//!
//! One JSON document maps each installed package name to its record. The
//! document is loaded whole at startup and rewritten whole after every
//! mutating command; a missing file is an empty store, not an error.
//!
//! The store is an explicit value passed into and returned from the
//! operations layer, never ambient global state.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Map from package name to its installed record. A name denotes at most
/// one installed version at a time.
pub type PackageStore = BTreeMap<String, InstalledPackage>;

/// Record of one installed package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledPackage {
    /// Seconds since epoch at the end of the successful transaction. Set by
    /// the operations layer, not by the transaction engine.
    pub installed_at: Option<f64>,
    /// Version string parsed from the archive file name.
    pub version: String,
    /// Package-relative path -> content digest for every regular file the
    /// currently-installed version ships (reserved manifest entries
    /// excluded).
    pub checksums: BTreeMap<String, String>,
    /// Paths the package author marked as user-editable. Accumulated across
    /// updates: the old record's set unioned with each new manifest.
    #[serde(default)]
    pub protected: BTreeSet<String>,
}

/// Load the installed-package store. A missing file yields an empty store.
pub fn load(db_path: &str) -> Result<PackageStore> {
    debug!("loading installed packages from {db_path}");
    if !Path::new(db_path).exists() {
        return Ok(PackageStore::new());
    }
    Ok(serde_json::from_reader(BufReader::new(File::open(
        db_path,
    )?))?)
}

/// Rewrite the whole store document.
pub fn save(store: &PackageStore, db_path: &str) -> Result<()> {
    debug!("saving {} installed packages to {db_path}", store.len());
    let mut out = BufWriter::new(File::create(db_path)?);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"  ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    store.serialize(&mut ser)?;
    out.flush()?;
    Ok(())
}
