// src/error.rs

use thiserror::Error;

/// Core error types for treepkg
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Zip archive errors
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Installed-package store (de)serialization errors
    #[error("Store error: {0}")]
    Json(#[from] serde_json::Error),

    /// Tree-walking errors
    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// HTTP transport errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-forced install would clobber an existing file
    #[error("file exists: {0}")]
    FileExists(String),

    /// Non-forced update found a live file the old record does not own
    #[error("{0} already exists but is not part of original package")]
    ForeignFile(String),

    /// Name-based command on a package that is not installed
    #[error("package {0} not installed")]
    NotInstalled(String),

    /// Install of a package that is already installed
    #[error("package {0} already installed")]
    AlreadyInstalled(String),

    /// Package not present in any configured repository
    #[error("package {0} not available")]
    NotAvailable(String),

    /// Download failures that are not transport-level
    #[error("download failed: {0}")]
    Download(String),

    /// Paths that cannot be expressed relative to their base
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Safe delete ran out of staging names
    #[error("no free deletion staging name for: {0}")]
    StagingExhausted(String),

    /// `check` found missing or drifted files
    #[error("{0} file(s) failed verification")]
    CheckFailed(u32),
}

/// Result type alias using treepkg's Error type
pub type Result<T> = std::result::Result<T, Error>;
