// src/lib.rs

//! treepkg Package Manager
//!
//! Package manager for zip-based file-tree distributions: installs, updates
//! and removes versioned packages under a filesystem prefix.
//!
//! # Architecture
//!
//! - Store-first: one JSON document maps package name to its installed record
//! - File-level tracking: SHA-256 digests drive drift detection and the
//!   three-way update diff
//! - Protected files: user-edited configuration survives upgrades via
//!   `.treepkg_save` / `.treepkg_new` / `.treepkg_backup` artifacts
//! - Safe delete: rename-then-remove so locked files never abort a
//!   transaction after the name has been detached

pub mod archive;
pub mod checksum;
mod error;
pub mod filesystem;
pub mod ops;
pub mod package;
pub mod repository;
pub mod store;
pub mod transaction;
pub mod version;

pub use error::{Error, Result};
