// src/checksum.rs

//! Content digests for installed files
//!
//! One digest routine serves two purposes: the integrity fingerprint stored
//! in the installed-package record, and the comparison key for the
//! three-way diff during updates.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};

/// Read buffer size for digest computation (1 MiB).
const DIGEST_BUF_SIZE: usize = 1024 * 1024;

/// Compute the hex-encoded SHA-256 digest of a file's content.
pub fn file_digest(path: &str) -> Result<String> {
    let mut hasher = Sha256::new();
    let mut reader = BufReader::new(File::open(path)?);
    let mut buffer = vec![0u8; DIGEST_BUF_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
