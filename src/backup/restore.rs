//! Backup restoration for pgvault
//!
//! Handles loading a dump back into PostgreSQL, decompressing it first when
//! needed.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::config::BackupSettings;
use crate::error::{VaultError, VaultResult};
use crate::tools::{PgTools, ToolRunner};

use super::artifact::{is_compressed, strip_gz};
use super::checksum::{verify_checksum, ChecksumStatus};

/// Handles restoring from backups
pub struct RestoreManager<'a, R> {
    settings: &'a BackupSettings,
    tools: &'a PgTools<R>,
}

impl<'a, R: ToolRunner> RestoreManager<'a, R> {
    /// Create a new RestoreManager
    pub fn new(settings: &'a BackupSettings, tools: &'a PgTools<R>) -> Self {
        Self { settings, tools }
    }

    /// Restore `backup_path` into the configured database
    pub fn restore(&self, backup_path: &Path) -> VaultResult<RestoreOutcome> {
        let database = self.tools.connection().database.clone();
        self.restore_into(backup_path, &database)
    }

    /// Restore `backup_path` into `database`
    pub fn restore_into(&self, backup_path: &Path, database: &str) -> VaultResult<RestoreOutcome> {
        self.restore_with(backup_path, database, self.settings.drop_before_restore)
    }

    /// Restore `backup_path` into `database`, optionally dropping and
    /// recreating it first
    ///
    /// This overwrites the target database. A compressed artifact is expanded
    /// next to itself and the expanded copy is always removed afterwards.
    pub fn restore_with(
        &self,
        backup_path: &Path,
        database: &str,
        recreate: bool,
    ) -> VaultResult<RestoreOutcome> {
        if !backup_path.is_file() {
            error!(file = %backup_path.display(), "backup file does not exist");
            return Err(VaultError::backup_not_found(
                backup_path.display().to_string(),
            ));
        }

        if recreate && database == self.tools.admin_database() {
            return Err(VaultError::Config(format!(
                "Cannot drop and recreate '{}' while it is the admin database; \
                 restore into another database or set a different admin database",
                database
            )));
        }

        let checksum = if self.settings.verify_checksum_on_restore {
            Some(check_integrity(backup_path)?)
        } else {
            None
        };

        info!(database, file = %backup_path.display(), "restoring backup");

        let decompressed = is_compressed(backup_path);
        let sql_file = if decompressed {
            self.decompress(backup_path)?
        } else {
            backup_path.to_path_buf()
        };

        let result = self.load(&sql_file, database, recreate);

        if decompressed {
            if let Err(e) = fs::remove_file(&sql_file) {
                warn!(file = %sql_file.display(), error = %e, "failed to remove decompressed file");
            }
        }

        match result {
            Ok(()) => {
                info!(database, file = %backup_path.display(), "Successful restore");
                Ok(RestoreOutcome {
                    database: database.to_string(),
                    source: backup_path.to_path_buf(),
                    decompressed,
                    recreated: recreate,
                    checksum,
                })
            }
            Err(e) => {
                error!(database, error = %e, "restore failed");
                Err(e)
            }
        }
    }

    fn decompress(&self, backup_path: &Path) -> VaultResult<PathBuf> {
        let dest = strip_gz(backup_path);
        if dest.exists() {
            return Err(VaultError::Io(format!(
                "Refusing to overwrite existing file {}",
                dest.display()
            )));
        }

        if let Err(e) = self.tools.decompress(backup_path, &dest) {
            error!(file = %backup_path.display(), error = %e, "decompression failed");
            if dest.exists() {
                let _ = fs::remove_file(&dest);
            }
            return Err(e);
        }
        Ok(dest)
    }

    fn load(&self, sql_file: &Path, database: &str, recreate: bool) -> VaultResult<()> {
        if recreate {
            self.tools.drop_database(database)?;
            self.tools.create_database(database)?;
        }
        self.tools.load_file(database, sql_file)
    }
}

/// Compare the artifact with its sidecar; a mismatch aborts the restore
fn check_integrity(backup_path: &Path) -> VaultResult<ChecksumStatus> {
    let status = verify_checksum(backup_path)?;
    match &status {
        ChecksumStatus::Match => {
            info!(file = %backup_path.display(), "checksum verified");
        }
        ChecksumStatus::Missing => {
            warn!(file = %backup_path.display(), "no checksum sidecar, restoring unverified");
        }
        ChecksumStatus::Mismatch { expected, actual } => {
            return Err(VaultError::Verification(format!(
                "checksum mismatch for {}: expected {}, got {}",
                backup_path.display(),
                expected,
                actual
            )));
        }
    }
    Ok(status)
}

/// Result of a restore operation
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    /// Database the dump was loaded into
    pub database: String,
    /// Artifact that was restored
    pub source: PathBuf,
    /// Whether a temporary decompressed copy was used
    pub decompressed: bool,
    /// Whether the database was dropped and recreated first
    pub recreated: bool,
    /// Sidecar check result, `None` when verification is disabled
    pub checksum: Option<ChecksumStatus>,
}

impl RestoreOutcome {
    /// Get a one-line summary of the restore
    pub fn summary(&self) -> String {
        let mut summary = format!("Restored {} into {}", self.source.display(), self.database);
        if self.recreated {
            summary.push_str(" (recreated)");
        }
        summary
    }
}
