//! Backup manager for pgvault
//!
//! Runs the dump pipeline: `pg_dump`, optional gzip, checksum sidecar and
//! age-based rotation of the backup directory.

use std::fs;
use std::path::Path;

use chrono::{Local, NaiveDateTime, Timelike};
use tracing::{error, info, warn};

use crate::config::BackupSettings;
use crate::error::{VaultError, VaultResult};
use crate::tools::{PgTools, ToolRunner};

use super::artifact::{list_backups, next_available_path, BackupArtifact, BackupInfo, BackupType};
use super::checksum::{generate_checksum, sidecar_path};
use super::retention::RetentionRotator;

/// Creates backups and manages the backup directory
pub struct BackupManager<'a, R> {
    settings: &'a BackupSettings,
    tools: &'a PgTools<R>,
}

impl<'a, R: ToolRunner> BackupManager<'a, R> {
    /// Create a new BackupManager
    pub fn new(settings: &'a BackupSettings, tools: &'a PgTools<R>) -> Self {
        Self { settings, tools }
    }

    /// Get backup directory path
    pub fn backup_dir(&self) -> &Path {
        &self.settings.backup_dir
    }

    /// Back up the configured database
    pub fn perform_backup(&self, kind: BackupType) -> VaultResult<BackupArtifact> {
        let database = self.tools.connection().database.clone();
        self.perform_backup_of(&database, kind)
    }

    /// Back up `database`
    ///
    /// Returns the final artifact. The artifact just written and its sidecar
    /// are never removed by the rotation that follows.
    pub fn perform_backup_of(&self, database: &str, kind: BackupType) -> VaultResult<BackupArtifact> {
        fs::create_dir_all(self.backup_dir()).map_err(|e| {
            VaultError::Io(format!(
                "Failed to create backup directory {}: {}",
                self.backup_dir().display(),
                e
            ))
        })?;

        let created_at = now_to_the_second();
        let dump_path = next_available_path(self.backup_dir(), kind, created_at);
        info!(database, kind = %kind, file = %dump_path.display(), "starting backup");

        if let Err(e) = self.tools.dump(database, &dump_path) {
            error!(database, error = %e, "backup failed");
            remove_partial(&dump_path);
            return Err(e);
        }

        let (path, compressed) = if self.settings.compression {
            match self.tools.compress(&dump_path) {
                Ok(gz) => (gz, true),
                Err(e) => {
                    warn!(error = %e, "compression failed, keeping uncompressed dump");
                    (dump_path, false)
                }
            }
        } else {
            (dump_path, false)
        };

        let checksum = match generate_checksum(&path) {
            Ok(digest) => Some(digest),
            Err(e) => {
                warn!(error = %e, "failed to generate checksum");
                None
            }
        };

        let size_bytes = fs::metadata(&path)
            .map_err(|e| VaultError::Io(format!("Failed to stat {}: {}", path.display(), e)))?
            .len();

        info!(kind = %kind, file = %path.display(), size_bytes, "Successful {} backup", kind);

        let keep = [path.clone(), sidecar_path(&path)];
        self.rotator().rotate_except(&keep);

        Ok(BackupArtifact {
            kind,
            created_at,
            path,
            compressed,
            checksum,
            size_bytes,
        })
    }

    /// Rotator over this manager's directory and retention window
    pub fn rotator(&self) -> RetentionRotator {
        RetentionRotator::new(self.backup_dir(), self.settings.retention_days)
    }

    /// List all available backups, newest first
    pub fn list_backups(&self) -> VaultResult<Vec<BackupInfo>> {
        list_backups(self.backup_dir())
    }

    /// Get the most recent backup
    pub fn get_latest_backup(&self) -> VaultResult<Option<BackupInfo>> {
        Ok(self.list_backups()?.into_iter().next())
    }
}

fn now_to_the_second() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            warn!(file = %path.display(), error = %e, "failed to remove partial dump");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::artifact::parse_backup_filename;
    use crate::backup::checksum::compute_checksum;
    use crate::config::ConnectionConfig;
    use crate::tools::testing::FakeRunner;
    use tempfile::TempDir;

    fn create_test_env(compression: bool) -> (BackupSettings, PgTools<FakeRunner>, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let settings = BackupSettings {
            backup_dir: temp_dir.path().join("backups"),
            compression,
            ..Default::default()
        };
        let mut connection = ConnectionConfig::default();
        connection.database = "app".into();
        let tools = PgTools::new(connection, "postgres", FakeRunner::new());
        (settings, tools, temp_dir)
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_compressed_backup() {
        let (settings, tools, _temp) = create_test_env(true);
        let manager = BackupManager::new(&settings, &tools);

        let artifact = manager.perform_backup(BackupType::Daily).unwrap();

        assert!(artifact.compressed);
        assert!(artifact.path.exists());
        let filename = artifact.path.file_name().unwrap().to_str().unwrap();
        let parsed = parse_backup_filename(filename).unwrap();
        assert_eq!(parsed.kind, BackupType::Daily);
        assert_eq!(parsed.stamped_at, artifact.created_at);

        let checksum = artifact.checksum.clone().unwrap();
        assert_eq!(checksum, compute_checksum(&artifact.path).unwrap());
        assert_eq!(fs::read_to_string(sidecar_path(&artifact.path)).unwrap(), checksum);
        assert_eq!(artifact.size_bytes, fs::metadata(&artifact.path).unwrap().len());

        // Nothing but the artifact and its sidecar
        assert_eq!(file_names(manager.backup_dir()).len(), 2);
        assert_eq!(tools.runner().programs(), vec!["pg_dump", "gzip"]);
    }

    #[test]
    fn test_uncompressed_backup() {
        let (settings, tools, _temp) = create_test_env(false);
        let manager = BackupManager::new(&settings, &tools);

        let artifact = manager.perform_backup(BackupType::Weekly).unwrap();

        assert!(!artifact.compressed);
        assert!(artifact.path.to_string_lossy().ends_with(".sql"));
        assert!(sidecar_path(&artifact.path).is_file());
        assert_eq!(tools.runner().programs(), vec!["pg_dump"]);
        assert!(fs::read_to_string(&artifact.path)
            .unwrap()
            .contains("-- dump of app"));
    }

    #[test]
    fn test_every_type_names_its_artifact() {
        let (settings, tools, _temp) = create_test_env(true);
        let manager = BackupManager::new(&settings, &tools);

        for kind in BackupType::ALL {
            let artifact = manager.perform_backup(kind).unwrap();
            let filename = artifact.path.file_name().unwrap().to_string_lossy().into_owned();
            assert!(filename.starts_with(&format!("{}_backup_", kind)));
            assert!(filename.ends_with(".sql.gz"));
        }
    }

    #[test]
    fn test_dump_failure_leaves_no_partial_file() {
        let (settings, tools, _temp) = create_test_env(true);
        tools.runner().fail_when(|cmd| cmd.program == "pg_dump");
        let manager = BackupManager::new(&settings, &tools);

        let err = manager.perform_backup(BackupType::Daily).unwrap_err();

        assert!(matches!(err, VaultError::ToolFailed { .. }));
        assert!(file_names(manager.backup_dir()).is_empty());
        assert!(manager.get_latest_backup().unwrap().is_none());
    }

    #[test]
    fn test_compression_failure_falls_back_to_plain_dump() {
        let (settings, tools, _temp) = create_test_env(true);
        tools.runner().fail_when(|cmd| cmd.program == "gzip");
        let manager = BackupManager::new(&settings, &tools);

        let artifact = manager.perform_backup(BackupType::Monthly).unwrap();

        assert!(!artifact.compressed);
        assert!(artifact.path.to_string_lossy().ends_with(".sql"));
        assert!(artifact.path.exists());
        assert!(artifact.checksum.is_some());
    }

    #[test]
    fn test_backup_of_explicit_database() {
        let (settings, tools, _temp) = create_test_env(false);
        let manager = BackupManager::new(&settings, &tools);

        manager
            .perform_backup_of("app_test", BackupType::Test)
            .unwrap();

        let calls = tools.runner().calls();
        assert_eq!(calls[0].arg_after("-d"), Some("app_test"));
        assert_eq!(tools.connection().database, "app");
    }

    #[test]
    fn test_rotation_spares_new_artifact() {
        let (mut settings, tools, _temp) = create_test_env(true);
        settings.retention_days = 0;
        fs::create_dir_all(&settings.backup_dir).unwrap();
        let stale = settings.backup_dir.join("daily_backup_20200101_000000.sql.gz");
        fs::write(&stale, "old").unwrap();

        let manager = BackupManager::new(&settings, &tools);
        let artifact = manager.perform_backup(BackupType::Daily).unwrap();

        assert!(!stale.exists());
        assert!(artifact.path.exists());
        assert!(sidecar_path(&artifact.path).exists());
    }

    #[test]
    fn test_list_and_latest() {
        let (settings, tools, _temp) = create_test_env(true);
        let manager = BackupManager::new(&settings, &tools);

        assert!(manager.list_backups().unwrap().is_empty());

        let artifact = manager.perform_backup(BackupType::Migration).unwrap();
        let backups = manager.list_backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(backups[0].kind, Some(BackupType::Migration));
        assert_eq!(backups[0].stamped_at, Some(artifact.created_at));
        assert!(backups[0].has_checksum);

        let latest = manager.get_latest_backup().unwrap().unwrap();
        assert_eq!(latest.path, artifact.path);
    }
}
