//! Backup artifacts and their on-disk naming
//!
//! Artifacts are named `{type}_backup_{YYYYMMDD_HHMMSS}.sql`, optionally
//! followed by `.gz`. A second backup of the same type within the same second
//! gets a `_{n}` sequence suffix before `.sql`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDateTime};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use super::checksum::sidecar_path;
use crate::error::{VaultError, VaultResult};

/// Timestamp layout embedded in artifact filenames
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const NAME_MARKER: &str = "_backup_";
const SQL_SUFFIX: &str = ".sql";
const GZ_SUFFIX: &str = ".gz";

/// Kind of backup, encoded in the filename
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Daily,
    Weekly,
    Monthly,
    Migration,
    Test,
}

impl BackupType {
    pub const ALL: [BackupType; 5] = [
        BackupType::Daily,
        BackupType::Weekly,
        BackupType::Monthly,
        BackupType::Migration,
        BackupType::Test,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Daily => "daily",
            BackupType::Weekly => "weekly",
            BackupType::Monthly => "monthly",
            BackupType::Migration => "migration",
            BackupType::Test => "test",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of one successful backup run
#[derive(Debug, Clone, Serialize)]
pub struct BackupArtifact {
    /// Backup type
    pub kind: BackupType,
    /// Local time encoded in the filename
    pub created_at: NaiveDateTime,
    /// Final artifact path (`.sql` or `.sql.gz`)
    pub path: PathBuf,
    /// Whether the artifact is gzip-compressed
    pub compressed: bool,
    /// Hex SHA-256 digest, absent when the sidecar could not be written
    pub checksum: Option<String>,
    /// Artifact size in bytes
    pub size_bytes: u64,
}

/// Listing entry for a backup file found on disk
#[derive(Debug, Clone, Serialize)]
pub struct BackupInfo {
    /// Backup filename
    pub filename: String,
    /// Full path to backup
    pub path: PathBuf,
    /// Type parsed from the filename prefix, if recognized
    pub kind: Option<BackupType>,
    /// Local time encoded in a well-formed filename
    pub stamped_at: Option<NaiveDateTime>,
    /// File modification time
    pub modified_at: DateTime<Local>,
    /// Size in bytes
    pub size_bytes: u64,
    /// Whether the file is gzip-compressed
    pub compressed: bool,
    /// Whether a checksum sidecar sits next to it
    pub has_checksum: bool,
}

impl BackupInfo {
    /// Build listing info for `path`, or `None` if it is not a backup file
    pub fn from_path(path: &Path) -> Option<Self> {
        let filename = path.file_name()?.to_str()?.to_string();
        if !is_backup_filename(&filename) {
            return None;
        }

        let metadata = fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        let modified_at = metadata.modified().ok().map(DateTime::<Local>::from)?;

        let name = parse_backup_filename(&filename);

        Some(BackupInfo {
            kind: name
                .as_ref()
                .map(|n| n.kind)
                .or_else(|| kind_from_filename(&filename)),
            stamped_at: name.map(|n| n.stamped_at),
            compressed: filename.ends_with(GZ_SUFFIX),
            has_checksum: sidecar_path(path).is_file(),
            path: path.to_path_buf(),
            size_bytes: metadata.len(),
            filename,
            modified_at,
        })
    }

    /// Type name for display, `unknown` for foreign files
    pub fn kind_label(&self) -> &'static str {
        self.kind.map(|k| k.as_str()).unwrap_or("unknown")
    }
}

/// Parsed components of a well-formed artifact filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ArtifactName {
    pub kind: BackupType,
    pub stamped_at: NaiveDateTime,
}

/// Format an artifact filename; sequence 0 carries no suffix
pub(crate) fn backup_filename(
    kind: BackupType,
    stamped_at: NaiveDateTime,
    sequence: u32,
) -> String {
    let stamp = stamped_at.format(TIMESTAMP_FORMAT);
    if sequence == 0 {
        format!("{}{}{}{}", kind, NAME_MARKER, stamp, SQL_SUFFIX)
    } else {
        format!("{}{}{}_{}{}", kind, NAME_MARKER, stamp, sequence, SQL_SUFFIX)
    }
}

/// Parse a filename produced by [`backup_filename`], with or without `.gz`
pub(crate) fn parse_backup_filename(filename: &str) -> Option<ArtifactName> {
    let stem = filename.strip_suffix(GZ_SUFFIX).unwrap_or(filename);
    let stem = stem.strip_suffix(SQL_SUFFIX)?;
    let (kind, rest) = stem.split_once(NAME_MARKER)?;
    let kind = BackupType::from_name(kind)?;

    // YYYYMMDD_HHMMSS is 15 characters, optionally followed by _{n}
    if rest.len() < 15 || !rest.is_char_boundary(15) {
        return None;
    }
    let (stamp, tail) = rest.split_at(15);
    let stamped_at = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    if !tail.is_empty() {
        tail.strip_prefix('_')?.parse::<u32>().ok()?;
    }

    Some(ArtifactName { kind, stamped_at })
}

/// Whether a filename looks like a backup artifact (`.sql` or `.sql.gz`)
pub(crate) fn is_backup_filename(filename: &str) -> bool {
    filename.ends_with(SQL_SUFFIX) || filename.ends_with(".sql.gz")
}

/// Type encoded in the `{type}_backup_` prefix, if any
pub(crate) fn kind_from_filename(filename: &str) -> Option<BackupType> {
    let (kind, _) = filename.split_once(NAME_MARKER)?;
    BackupType::from_name(kind)
}

/// Whether `path` is a gzip-compressed artifact
pub fn is_compressed(path: &Path) -> bool {
    path.to_string_lossy().ends_with(GZ_SUFFIX)
}

/// `path` with a trailing `.gz` removed
pub fn strip_gz(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match raw.strip_suffix(GZ_SUFFIX) {
        Some(stripped) => PathBuf::from(stripped),
        None => path.to_path_buf(),
    }
}

/// First artifact path for `kind` at `stamped_at` that collides with nothing on disk
pub fn next_available_path(dir: &Path, kind: BackupType, stamped_at: NaiveDateTime) -> PathBuf {
    let mut sequence = 0;
    loop {
        let candidate = dir.join(backup_filename(kind, stamped_at, sequence));
        let mut compressed = candidate.clone().into_os_string();
        compressed.push(GZ_SUFFIX);
        if !candidate.exists() && !Path::new(&compressed).exists() {
            return candidate;
        }
        sequence += 1;
    }
}

/// All backup files in `dir`, newest first
///
/// A missing directory lists as empty.
pub fn list_backups(dir: &Path) -> VaultResult<Vec<BackupInfo>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();

    for entry in fs::read_dir(dir).map_err(|e| {
        VaultError::Io(format!("Failed to read backup directory {}: {}", dir.display(), e))
    })? {
        let entry =
            entry.map_err(|e| VaultError::Io(format!("Failed to read directory entry: {}", e)))?;

        if let Some(info) = BackupInfo::from_path(&entry.path()) {
            backups.push(info);
        }
    }

    // Sort by date, newest first
    backups.sort_by(|a, b| {
        b.modified_at
            .cmp(&a.modified_at)
            .then_with(|| b.filename.cmp(&a.filename))
    });

    Ok(backups)
}
