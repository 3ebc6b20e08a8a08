// src/repository/mod.rs

//! Repository discovery and package downloading
//!
//! A repository is either an HTTP index page listing package archives or a
//! local directory tree containing them. This module provides:
//! - Listing the archives a repository offers
//! - Grouping listings into a name -> locators map
//! - Version selection over a package's locators
//! - Downloading archives into the cache with byte-range resume

use crate::error::{Error, Result};
use crate::filesystem::as_unix_path;
use crate::package;
use crate::version::compare_versions;
use reqwest::blocking::Client;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Timeout for index fetches (not applied to archive downloads).
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Whether a repository locator is an HTTP(S) URL rather than a local path.
pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

fn index_client(unverified_ssl: bool) -> Result<Client> {
    Ok(Client::builder()
        .timeout(HTTP_TIMEOUT)
        .danger_accept_invalid_certs(unverified_ssl)
        .build()?)
}

fn download_client(unverified_ssl: bool) -> Result<Client> {
    // archive downloads can legitimately take a long time, bound only the
    // connection setup
    Ok(Client::builder()
        .connect_timeout(HTTP_TIMEOUT)
        .danger_accept_invalid_certs(unverified_ssl)
        .build()?)
}

/// List the package archive locators one repository offers.
pub fn repo_listing(repo: &str, unverified_ssl: bool) -> Result<Vec<String>> {
    info!("getting repo listing from {repo}");
    if is_url(repo) {
        repo_listing_http(repo, unverified_ssl)
    } else {
        repo_listing_dir(repo)
    }
}

fn repo_listing_http(url: &str, unverified_ssl: bool) -> Result<Vec<String>> {
    let resp = index_client(unverified_ssl)?.get(url).send()?;
    if !resp.status().is_success() {
        return Err(Error::Download(format!("HTTP {} from {url}", resp.status())));
    }
    let body = resp.text()?;

    Ok(extract_hrefs(&body)
        .into_iter()
        .filter(|href| href.ends_with(package::ARCHIVE_SUFFIX))
        .map(|href| format!("{url}/{href}"))
        .collect())
}

fn repo_listing_dir(path: &str) -> Result<Vec<String>> {
    let mut listing = Vec::new();
    for entry in walkdir::WalkDir::new(path) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            continue;
        }
        let file_path = as_unix_path(entry.path());
        if file_path.ends_with(package::ARCHIVE_SUFFIX) {
            listing.push(file_path);
        }
    }
    Ok(listing)
}

/// Pull `href` attribute values out of an HTML index page. Index pages are
/// plain listings, so a tolerant scan beats a full HTML parser here.
fn extract_hrefs(body: &str) -> Vec<String> {
    let mut hrefs = Vec::new();
    let mut rest = body;
    while let Some(idx) = rest.find("href") {
        rest = &rest[idx + 4..];
        let after = rest.trim_start();
        let Some(after) = after.strip_prefix('=') else {
            continue;
        };
        let after = after.trim_start();
        let value = match after.bytes().next() {
            Some(quote @ (b'"' | b'\'')) => after[1..].split(quote as char).next(),
            Some(_) => after.split([' ', '\t', '\r', '\n', '>']).next(),
            None => None,
        };
        if let Some(value) = value {
            if !value.is_empty() {
                hrefs.push(value.to_string());
            }
        }
    }
    hrefs
}

/// Enumerate every configured repository into a map from package name to
/// the locators offering it. Invalid archive names are skipped with a
/// warning; URL repositories are skipped entirely when `offline`.
pub fn available_packages(
    repos: &[String],
    offline: bool,
    unverified_ssl: bool,
) -> Result<HashMap<String, Vec<String>>> {
    debug!("getting available packages from {repos:?}");

    let mut available: HashMap<String, Vec<String>> = HashMap::new();
    for repo in repos {
        if offline && is_url(repo) {
            continue;
        }
        for locator in repo_listing(repo, unverified_ssl)? {
            let Some(file_name) = package::file_name_from(&locator) else {
                continue;
            };
            if !package::is_valid_archive_name(&file_name) {
                warn!("{file_name} is not a valid package file name");
                continue;
            }
            available
                .entry(package::package_name(&file_name))
                .or_default()
                .push(locator);
        }
    }
    Ok(available)
}

/// The locator carrying the highest version among `locators`.
pub fn max_version_locator(locators: &[String]) -> Option<String> {
    locators
        .iter()
        .max_by(|a, b| {
            let (va, vb) = (locator_version(a), locator_version(b));
            match compare_versions(&va, &vb) {
                // on ties prefer the earlier repository in the list
                Ordering::Equal => Ordering::Greater,
                ord => ord,
            }
        })
        .cloned()
}

/// The locator shipping exactly `version`, if any.
pub fn locator_for_version(locators: &[String], version: &str) -> Option<String> {
    locators
        .iter()
        .find(|locator| locator_version(locator) == version)
        .cloned()
}

fn locator_version(locator: &str) -> String {
    package::file_name_from(locator)
        .map(|file_name| package::package_version(&file_name))
        .unwrap_or_default()
}

/// Resolve a locator to a local archive path, downloading into the cache if
/// needed. Local paths pass through untouched; a cached archive is reused;
/// an interrupted download resumes from the partial `_` temp file when the
/// server supports byte ranges.
pub fn download_if_needed(url: &str, cache_dir: &str, unverified_ssl: bool) -> Result<String> {
    if !is_url(url) {
        return Ok(url.to_string());
    }

    let file_name = package::file_name_from(url)
        .ok_or_else(|| Error::Download(format!("no file name in {url}")))?;
    let target = format!("{cache_dir}/{file_name}");
    let partial = format!("{target}_");

    if Path::new(&target).exists() {
        info!("using cached {target}");
        return Ok(target);
    }

    info!("downloading {url} to {partial}");
    let client = download_client(unverified_ssl)?;

    let mut resume_from = 0;
    if Path::new(&partial).exists() {
        let head = index_client(unverified_ssl)?.head(url).send()?;
        if head.status().is_success()
            && head
                .headers()
                .get(reqwest::header::ACCEPT_RANGES)
                .is_some_and(|v| v == "bytes")
        {
            if let Ok(meta) = std::fs::metadata(&partial) {
                resume_from = meta.len();
            }
        } else {
            // server cannot resume, start over
            std::fs::remove_file(&partial)?;
        }
    }

    let mut req = client.get(url);
    if resume_from > 0 {
        info!("resuming from byte {resume_from}");
        req = req.header(reqwest::header::RANGE, format!("bytes={resume_from}-"));
    }

    let mut resp = req.send()?;
    if !resp.status().is_success() {
        return Err(Error::Download(format!("HTTP {} from {url}", resp.status())));
    }
    let resume_from = effective_resume(resp.status(), resume_from);

    let out_file = if resume_from > 0 {
        OpenOptions::new().append(true).open(&partial)?
    } else {
        std::fs::File::create(&partial)?
    };
    let mut out = BufWriter::new(out_file);
    std::io::copy(&mut resp, &mut out)?;
    out.flush()?;
    drop(out);

    std::fs::rename(&partial, &target)?;
    Ok(target)
}

/// A resumed download may only append when the server answered `206 Partial
/// Content`; a `200 OK` carries the whole body again, so appending it to the
/// partial file would corrupt the archive.
fn effective_resume(status: reqwest::StatusCode, requested: u64) -> u64 {
    if requested > 0 && status != reqwest::StatusCode::PARTIAL_CONTENT {
        warn!("server ignored range request, restarting download");
        return 0;
    }
    requested
}

/// Delete every cached archive (including interrupted partial downloads).
pub fn clean_cache(cache_dir: &str) -> Result<()> {
    for entry in std::fs::read_dir(cache_dir)? {
        let entry = entry?;
        let path = as_unix_path(&entry.path());
        std::fs::remove_file(entry.path())?;
        println!("D {path}");
    }
    Ok(())
}
