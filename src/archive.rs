// src/archive.rs

//! Package archive extraction
//!
//! A package is a zip archive whose entries form the file tree rooted at the
//! archive root. Entries named with the reserved `.treepkg_` prefix carry
//! package metadata instead of payload; the only one currently defined is
//! the protected-paths manifest.
//!
//! Extraction must round-trip each entry's unix mode and modification time,
//! since install copies both onto the live tree.

use crate::error::Result;
use crate::filesystem::as_unix_path;
use filetime::FileTime;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tracing::{debug, trace, warn};

/// Reserved prefix for metadata entries at the archive root. Entries with
/// this prefix are never installed and never tracked in `checksums`.
pub const RESERVED_PREFIX: &str = ".treepkg_";

/// Manifest of protected (backup-eligible) relative paths, one per line.
pub const PROTECTED_MANIFEST: &str = ".treepkg_backup";

/// Extract a package archive into `dest`, preserving per-entry mode and
/// modification time.
pub fn extract_archive(archive_path: &str, dest: &str) -> Result<()> {
    debug!("extracting {archive_path} to {dest}");

    let mut archive = zip::ZipArchive::new(BufReader::new(File::open(archive_path)?))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            warn!("skipping archive entry with unsafe path: {}", entry.name());
            continue;
        };
        let outpath = Path::new(dest).join(relative);
        trace!("extract {}", as_unix_path(&outpath));

        if entry.is_dir() {
            std::fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                if !parent.exists() {
                    std::fs::create_dir_all(parent)?;
                }
            }
            let mut out = BufWriter::new(File::create(&outpath)?);
            std::io::copy(&mut entry, &mut out)?;
            out.flush()?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                &outpath,
                std::fs::Permissions::from_mode(entry.unix_mode().unwrap_or(0o755)),
            )?;
        }

        match entry.last_modified().and_then(|dt| datetime_to_filetime(&dt)) {
            Some(mtime) => filetime::set_file_times(&outpath, mtime, mtime)?,
            None => warn!("no usable timestamp for {}", as_unix_path(&outpath)),
        }
    }

    debug!("done extracting");
    Ok(())
}

/// Read the protected-paths manifest from an extracted archive.
///
/// A missing manifest means the package protects nothing. Blank lines and
/// `#` comments are ignored.
pub fn read_protected_manifest(scratch: &str) -> Result<BTreeSet<String>> {
    let manifest = format!("{scratch}/{PROTECTED_MANIFEST}");
    if !Path::new(&manifest).exists() {
        return Ok(BTreeSet::new());
    }
    Ok(std::fs::read_to_string(&manifest)?
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Zip timestamps are calendar fields without a zone; treat them as UTC.
fn datetime_to_filetime(dt: &zip::DateTime) -> Option<FileTime> {
    let month = time::Month::try_from(dt.month()).ok()?;
    let date = time::Date::from_calendar_date(i32::from(dt.year()), month, dt.day()).ok()?;
    let tod = time::Time::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    let unix = time::PrimitiveDateTime::new(date, tod)
        .assume_utc()
        .unix_timestamp();
    Some(FileTime::from_unix_time(unix, 0))
}
