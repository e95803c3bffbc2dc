//! SHA-256 checksum sidecars
//!
//! Each artifact gets a `{artifact}.sha256` file holding the lowercase hex
//! digest of its bytes and nothing else.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

use crate::error::{VaultError, VaultResult};

/// Sidecar extension, named after the hash algorithm
pub const CHECKSUM_EXTENSION: &str = "sha256";

const CHUNK_SIZE: usize = 4096;

/// Result of comparing an artifact against its sidecar
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChecksumStatus {
    Match,
    Mismatch { expected: String, actual: String },
    Missing,
}

/// Path of the sidecar for `path`
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(CHECKSUM_EXTENSION);
    PathBuf::from(name)
}

/// Whether `path` is itself a checksum sidecar
pub fn is_sidecar(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == CHECKSUM_EXTENSION)
}

/// Stream `path` through SHA-256 and return the hex digest
pub fn compute_checksum(path: &Path) -> VaultResult<String> {
    let file = File::open(path).map_err(|e| {
        VaultError::Checksum(format!("Failed to open {}: {}", path.display(), e))
    })?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHUNK_SIZE];

    loop {
        let read = reader.read(&mut buf).map_err(|e| {
            VaultError::Checksum(format!("Failed to read {}: {}", path.display(), e))
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the digest of `path` and write it to the sidecar
pub fn generate_checksum(path: &Path) -> VaultResult<String> {
    let digest = compute_checksum(path)?;
    let sidecar = sidecar_path(path);

    fs::write(&sidecar, &digest).map_err(|e| {
        VaultError::Checksum(format!("Failed to write {}: {}", sidecar.display(), e))
    })?;

    info!(checksum = %digest, file = %path.display(), "checksum generated");
    Ok(digest)
}

/// Recompute the digest of `path` and compare it with the sidecar
pub fn verify_checksum(path: &Path) -> VaultResult<ChecksumStatus> {
    let sidecar = sidecar_path(path);
    if !sidecar.is_file() {
        return Ok(ChecksumStatus::Missing);
    }

    let expected = fs::read_to_string(&sidecar)
        .map_err(|e| VaultError::Checksum(format!("Failed to read {}: {}", sidecar.display(), e)))?
        .trim()
        .to_ascii_lowercase();
    let actual = compute_checksum(path)?;

    if expected == actual {
        Ok(ChecksumStatus::Match)
    } else {
        Ok(ChecksumStatus::Mismatch { expected, actual })
    }
}
