//! Backup CLI commands
//!
//! Implements the backup, restore, listing, self-test, prune and verify
//! commands on top of the backup module.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use clap::Subcommand;

use crate::backup::{
    verify_checksum, BackupInfo, BackupManager, BackupType, ChecksumStatus, RestoreManager,
    SelfTest,
};
use crate::config::Settings;
use crate::error::{VaultError, VaultResult};
use crate::tools::{PgTools, ToolRunner};

/// Backup subcommands
#[derive(Subcommand)]
pub enum BackupCommands {
    /// Back up the configured database
    Backup {
        /// Backup type, recorded in the filename
        #[arg(short = 't', long = "type", value_enum, default_value_t = BackupType::Daily)]
        kind: BackupType,
    },

    /// Restore a backup, choosing interactively when no file is given
    Restore {
        /// Backup filename or path (use 'latest' for most recent)
        #[arg(short, long)]
        file: Option<String>,

        /// Restore into this database instead of the configured one
        #[arg(short, long)]
        database: Option<String>,
    },

    /// List all available backups
    List {
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Back up and restore a disposable test database
    Test,

    /// Delete backups older than the retention window
    Prune {
        /// Only show what would be deleted
        #[arg(long)]
        dry_run: bool,
    },

    /// Check backups against their checksum sidecars
    Verify {
        /// Backup filename or path; all backups when omitted
        #[arg(short, long)]
        file: Option<String>,
    },
}

/// Handle a backup command
pub fn handle_backup_command<R: ToolRunner>(
    settings: &Settings,
    tools: &PgTools<R>,
    cmd: BackupCommands,
) -> VaultResult<()> {
    let manager = BackupManager::new(&settings.backup, tools);

    match cmd {
        BackupCommands::Backup { kind } => {
            let artifact = manager.perform_backup(kind)?;
            println!("Backup created: {}", artifact.path.display());
            println!("Size: {}", format_size(artifact.size_bytes));
            if let Some(checksum) = &artifact.checksum {
                println!("SHA-256: {}", checksum);
            }
        }

        BackupCommands::Restore { file, database } => {
            let backup_path = match file {
                Some(file) => resolve_backup_path(&manager, &file)?,
                None => {
                    let backups = manager.list_backups()?;
                    let stdin = io::stdin();
                    match select_backup(&backups, &mut stdin.lock(), &mut io::stdout())? {
                        Some(path) => path,
                        None => {
                            println!("Restore cancelled.");
                            return Ok(());
                        }
                    }
                }
            };

            let restore_manager = RestoreManager::new(&settings.backup, tools);
            let outcome = match database {
                Some(database) => restore_manager.restore_into(&backup_path, &database)?,
                None => restore_manager.restore(&backup_path)?,
            };
            println!("Restore complete!");
            println!("{}", outcome.summary());
        }

        BackupCommands::List { json } => {
            let backups = manager.list_backups()?;

            if json {
                println!("{}", serde_json::to_string_pretty(&backups)?);
                return Ok(());
            }

            if backups.is_empty() {
                println!("No backups available in {}", manager.backup_dir().display());
                println!("Create one with: pgvault backup");
                return Ok(());
            }

            println!("Available Backups");
            println!("=================");
            println!();
            print_listing(&backups, &mut io::stdout())?;
            println!();
            println!("Total: {} backup(s)", backups.len());
        }

        BackupCommands::Test => {
            println!("Running self-test...");
            let report = SelfTest::new(&settings.backup, tools).run()?;
            println!(
                "Self-test passed: {} rows restored into {}",
                report.row_count, report.database
            );
        }

        BackupCommands::Prune { dry_run } => {
            let rotator = manager.rotator();

            if dry_run {
                let expired = rotator.expired();
                if expired.is_empty() {
                    println!("No backups to prune.");
                } else {
                    println!("Would delete {} file(s):", expired.len());
                    for path in &expired {
                        println!("  {}", display_name(path));
                    }
                }
                println!("Retention policy: {} day(s)", rotator.retention_days());
                return Ok(());
            }

            let report = rotator.rotate();
            println!("Deleted {} file(s).", report.deleted.len());
            if !report.failed.is_empty() {
                return Err(VaultError::Io(format!(
                    "Failed to delete {} file(s)",
                    report.failed.len()
                )));
            }
        }

        BackupCommands::Verify { file } => {
            let targets = match file {
                Some(file) => vec![resolve_backup_path(&manager, &file)?],
                None => manager.list_backups()?.into_iter().map(|b| b.path).collect(),
            };

            if targets.is_empty() {
                println!("No backups to verify.");
                return Ok(());
            }

            let mut mismatches = 0;
            for path in &targets {
                let label = match verify_checksum(path)? {
                    ChecksumStatus::Match => "OK",
                    ChecksumStatus::Missing => "NO CHECKSUM",
                    ChecksumStatus::Mismatch { .. } => {
                        mismatches += 1;
                        "MISMATCH"
                    }
                };
                println!("{:<12} {}", label, display_name(path));
            }

            if mismatches > 0 {
                return Err(VaultError::Verification(format!(
                    "{} of {} backup(s) failed checksum verification",
                    mismatches,
                    targets.len()
                )));
            }
        }
    }

    Ok(())
}

/// Print a numbered listing, newest first
fn print_listing<W: Write>(backups: &[BackupInfo], out: &mut W) -> VaultResult<()> {
    let now = Local::now();
    for (i, backup) in backups.iter().enumerate() {
        let age = now.signed_duration_since(backup.modified_at);
        let checksum_marker = if backup.has_checksum { "" } else { " [no checksum]" };
        writeln!(
            out,
            "  {}. {} ({}, {}, {} ago){}",
            i + 1,
            backup.filename,
            backup.kind_label(),
            format_size(backup.size_bytes),
            format_duration(age),
            checksum_marker,
        )?;
    }
    Ok(())
}

/// Ask the user to pick a backup by number
///
/// `Ok(None)` means the user entered 0 to cancel.
fn select_backup<I: BufRead, W: Write>(
    backups: &[BackupInfo],
    input: &mut I,
    out: &mut W,
) -> VaultResult<Option<PathBuf>> {
    if backups.is_empty() {
        return Err(VaultError::NotFound {
            entity_type: "Backup",
            identifier: "no backups available to restore".to_string(),
        });
    }

    writeln!(out, "Available Backups")?;
    writeln!(out, "=================")?;
    print_listing(backups, out)?;
    writeln!(out)?;
    write!(out, "Select a backup to restore (0 to cancel): ")?;
    out.flush()?;

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(VaultError::InvalidInput("no selection entered".to_string()));
    }

    let choice: usize = line
        .trim()
        .parse()
        .map_err(|_| VaultError::InvalidInput(format!("'{}' is not a number", line.trim())))?;

    match choice {
        0 => Ok(None),
        n if n <= backups.len() => Ok(Some(backups[n - 1].path.clone())),
        n => Err(VaultError::InvalidInput(format!(
            "{} is out of range (1-{})",
            n,
            backups.len()
        ))),
    }
}

/// Resolve a backup identifier to a full path
fn resolve_backup_path<R: ToolRunner>(
    manager: &BackupManager<'_, R>,
    backup: &str,
) -> VaultResult<PathBuf> {
    // Handle "latest" keyword
    if backup.eq_ignore_ascii_case("latest") {
        return manager
            .get_latest_backup()?
            .map(|b| b.path)
            .ok_or_else(|| VaultError::backup_not_found("latest"));
    }

    // Check if it's a full path
    let path = PathBuf::from(backup);
    if path.is_file() {
        return Ok(path);
    }

    // Check if it's a filename in the backup directory
    let backup_path = manager.backup_dir().join(backup);
    if backup_path.is_file() {
        return Ok(backup_path);
    }

    Err(VaultError::backup_not_found(backup))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

/// Format a duration in human-readable form
fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);

    if total_seconds < 60 {
        return format!("{}s", total_seconds);
    }

    let minutes = total_seconds / 60;
    if minutes < 60 {
        return format!("{}m", minutes);
    }

    let hours = minutes / 60;
    if hours < 24 {
        return format!("{}h", hours);
    }

    let days = hours / 24;
    if days < 30 {
        return format!("{}d", days);
    }

    let months = days / 30;
    format!("{}mo", months)
}

/// Format a file size in human-readable form
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
