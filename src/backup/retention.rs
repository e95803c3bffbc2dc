//! Age-based rotation of the backup directory
//!
//! Every regular file older than the retention window is deleted. An artifact
//! and its checksum sidecar expire together: deleting an artifact also deletes
//! its sidecar, and a sidecar is kept for as long as its artifact is. Sidecars
//! without an artifact age out on their own.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing::{error, info, warn};

use super::checksum::is_sidecar;

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// What a rotation pass did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RotationReport {
    /// Files that were removed
    pub deleted: Vec<PathBuf>,
    /// Expired files that could not be removed
    pub failed: Vec<PathBuf>,
}

impl RotationReport {
    pub fn is_noop(&self) -> bool {
        self.deleted.is_empty() && self.failed.is_empty()
    }
}

/// Deletes files older than the retention window
#[derive(Debug, Clone)]
pub struct RetentionRotator {
    backup_dir: PathBuf,
    retention_days: u64,
}

impl RetentionRotator {
    pub fn new(backup_dir: impl Into<PathBuf>, retention_days: u64) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            retention_days,
        }
    }

    pub fn retention_days(&self) -> u64 {
        self.retention_days
    }

    /// Files modified at or before the cutoff are expired
    ///
    /// `None` when the window reaches back before the epoch, so nothing expires.
    pub fn cutoff(&self, now: SystemTime) -> Option<SystemTime> {
        let window = Duration::from_secs(self.retention_days.saturating_mul(SECONDS_PER_DAY));
        now.checked_sub(window)
    }

    /// Delete every expired file
    pub fn rotate(&self) -> RotationReport {
        self.rotate_except(&[])
    }

    /// Delete every expired file except those in `keep`
    pub fn rotate_except(&self, keep: &[PathBuf]) -> RotationReport {
        self.rotate_at(SystemTime::now(), keep)
    }

    /// Files a rotation would delete right now, without deleting them
    pub fn expired(&self) -> Vec<PathBuf> {
        self.select_expired(SystemTime::now(), &[])
    }

    fn rotate_at(&self, now: SystemTime, keep: &[PathBuf]) -> RotationReport {
        info!(
            retention_days = self.retention_days,
            dir = %self.backup_dir.display(),
            "rotating backups"
        );

        let mut report = RotationReport::default();
        for path in self.select_expired(now, keep) {
            match fs::remove_file(&path) {
                Ok(()) => {
                    info!(file = %display_name(&path), "removed old backup");
                    report.deleted.push(path);
                }
                Err(e) => {
                    error!(file = %display_name(&path), error = %e, "failed to remove old backup");
                    report.failed.push(path);
                }
            }
        }
        report
    }

    fn select_expired(&self, now: SystemTime, keep: &[PathBuf]) -> Vec<PathBuf> {
        let Some(cutoff) = self.cutoff(now) else {
            return Vec::new();
        };

        let entries = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!(dir = %self.backup_dir.display(), error = %e, "backup rotation error");
                return Vec::new();
            }
        };

        let mut files = HashSet::new();
        let mut expired = HashSet::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            let modified = match metadata.modified() {
                Ok(modified) => modified,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "skipping file without mtime");
                    continue;
                }
            };
            if modified <= cutoff && !keep.contains(&path) {
                expired.insert(path.clone());
            }
            files.insert(path);
        }

        let mut doomed = BTreeSet::new();
        for path in &files {
            if is_sidecar(path) {
                let artifact = path.with_extension("");
                if files.contains(&artifact) {
                    if expired.contains(&artifact) && !keep.contains(path) {
                        doomed.insert(path.clone());
                    }
                } else if expired.contains(path) {
                    doomed.insert(path.clone());
                }
            } else if expired.contains(path) {
                doomed.insert(path.clone());
            }
        }

        doomed.into_iter().collect()
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
