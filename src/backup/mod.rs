//! Backup system for pgvault
//!
//! Wraps `pg_dump`, `psql`, `gzip` and `gunzip` into a backup pipeline with
//! checksums and age-based retention.
//!
//! # Architecture
//!
//! - `BackupManager`: dumps, compresses, checksums and rotates
//! - `RestoreManager`: verifies, decompresses and loads a dump
//! - `RetentionRotator`: deletes files older than the retention window
//! - `SelfTest`: round trip against a disposable `{db}_test` database
//!
//! # Backup Format
//!
//! Artifacts are plain SQL dumps named `{type}_backup_{YYYYMMDD_HHMMSS}.sql`,
//! gzip-compressed to `.sql.gz` by default. Each one gets a
//! `{artifact}.sha256` sidecar holding its hex SHA-256 digest.
//!
//! # Example
//!
//! ```rust,ignore
//! use pgvault::backup::{BackupManager, BackupType, RestoreManager};
//! use pgvault::config::Settings;
//! use pgvault::tools::{PgTools, SystemRunner};
//!
//! let settings = Settings::resolve(None)?;
//! let tools = PgTools::new(
//!     settings.database.clone(),
//!     settings.backup.admin_database.clone(),
//!     SystemRunner::new(settings.backup.tool_timeout()),
//! );
//!
//! let artifact = BackupManager::new(&settings.backup, &tools).perform_backup(BackupType::Daily)?;
//!
//! // Later, restore from backup
//! let outcome = RestoreManager::new(&settings.backup, &tools).restore(&artifact.path)?;
//! println!("{}", outcome.summary());
//! ```

mod artifact;
mod checksum;
mod manager;
mod restore;
mod retention;
mod selftest;

pub use artifact::{list_backups, BackupArtifact, BackupInfo, BackupType};
pub use checksum::{
    compute_checksum, generate_checksum, sidecar_path, verify_checksum, ChecksumStatus,
};
pub use manager::BackupManager;
pub use restore::{RestoreManager, RestoreOutcome};
pub use retention::{RetentionRotator, RotationReport};
pub use selftest::{SelfTest, SelfTestReport};
