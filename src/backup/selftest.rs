//! Round-trip backup and restore check against a disposable database

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::config::BackupSettings;
use crate::error::{VaultError, VaultResult};
use crate::tools::{PgTools, ToolRunner};

use super::artifact::BackupType;
use super::checksum::sidecar_path;
use super::manager::BackupManager;
use super::restore::RestoreManager;

const SEED_SQL: &str = "CREATE TABLE selftest_items (id SERIAL PRIMARY KEY, data TEXT); \
                        INSERT INTO selftest_items (data) VALUES ('test1'), ('test2');";
const COUNT_SQL: &str = "SELECT COUNT(*) FROM selftest_items;";
const EXPECTED_ROWS: u64 = 2;

/// Outcome of a passing self-test
#[derive(Debug, Clone)]
pub struct SelfTestReport {
    pub database: String,
    pub artifact: PathBuf,
    pub row_count: u64,
}

/// Seeds `{db}_test`, backs it up, restores it and counts the rows
pub struct SelfTest<'a, R> {
    settings: &'a BackupSettings,
    tools: &'a PgTools<R>,
}

impl<'a, R: ToolRunner> SelfTest<'a, R> {
    pub fn new(settings: &'a BackupSettings, tools: &'a PgTools<R>) -> Self {
        Self { settings, tools }
    }

    /// Name of the disposable database
    pub fn test_database(&self) -> String {
        format!("{}_test", self.tools.connection().database)
    }

    /// Run the round trip; the test database and artifact are removed on
    /// every exit path
    pub fn run(&self) -> VaultResult<SelfTestReport> {
        let database = self.test_database();
        info!(database = %database, "starting self-test");

        let mut artifact = None;
        let result = self.exercise(&database, &mut artifact);
        self.cleanup(&database, artifact.as_deref());

        match &result {
            Ok(report) => info!(database = %database, rows = report.row_count, "self-test passed"),
            Err(e) => warn!(database = %database, error = %e, "self-test failed"),
        }
        result
    }

    fn exercise(&self, database: &str, artifact: &mut Option<PathBuf>) -> VaultResult<SelfTestReport> {
        self.tools.drop_database(database)?;
        self.tools.create_database(database)?;
        self.tools.execute(database, SEED_SQL)?;

        let backup = BackupManager::new(self.settings, self.tools)
            .perform_backup_of(database, BackupType::Test)?;
        *artifact = Some(backup.path.clone());

        self.tools.drop_database(database)?;
        RestoreManager::new(self.settings, self.tools).restore_with(&backup.path, database, true)?;

        let output = self.tools.execute(database, COUNT_SQL)?;
        let row_count = parse_count(&output)?;
        if row_count != EXPECTED_ROWS {
            return Err(VaultError::Verification(format!(
                "expected {} rows in selftest_items, found {}",
                EXPECTED_ROWS, row_count
            )));
        }

        Ok(SelfTestReport {
            database: database.to_string(),
            artifact: backup.path,
            row_count,
        })
    }

    fn cleanup(&self, database: &str, artifact: Option<&Path>) {
        if let Err(e) = self.tools.drop_database(database) {
            warn!(database, error = %e, "failed to drop test database");
        }

        if let Some(path) = artifact {
            for file in [path.to_path_buf(), sidecar_path(path)] {
                if file.exists() {
                    if let Err(e) = fs::remove_file(&file) {
                        warn!(file = %file.display(), error = %e, "failed to remove test artifact");
                    }
                }
            }
        }
    }
}

/// First non-empty line of `psql -t -A` output as a row count
fn parse_count(output: &str) -> VaultResult<u64> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| VaultError::Verification("row count query returned nothing".into()))?;
    line.parse()
        .map_err(|_| VaultError::Verification(format!("unexpected row count output: {}", line)))
}
