use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;

use pgvault::cli::{handle_backup_command, BackupCommands};
use pgvault::config::Settings;
use pgvault::tools::{PgTools, SystemRunner};

#[derive(Parser)]
#[command(
    name = "pgvault",
    version,
    about = "PostgreSQL backup, restore and rotation utility",
    long_about = "pgvault takes plain SQL dumps with pg_dump, compresses and checksums \
                  them, rotates old backups by age and restores them with psql."
)]
struct Cli {
    /// JSON config file layered over environment settings
    #[arg(long, global = true, value_name = "PATH", env = "PGVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Backup(BackupCommands),

    /// Show the resolved configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::resolve(cli.config.as_deref())?;
    pgvault::logging::init(&settings.logging, cli.verbose)?;
    for warning in &settings.warnings {
        warn!("{}", warning);
    }

    match cli.command {
        Commands::Backup(cmd) => {
            let tools = PgTools::new(
                settings.database.clone(),
                settings.backup.admin_database.clone(),
                SystemRunner::new(settings.backup.tool_timeout()),
            );
            handle_backup_command(&settings, &tools, cmd)?;
        }
        Commands::Config => print_config(&settings),
    }

    Ok(())
}

fn print_config(settings: &Settings) {
    let db = &settings.database;
    let backup = &settings.backup;
    let timeout = match backup.tool_timeout() {
        Some(limit) => format!("{}s", limit.as_secs()),
        None => "disabled".to_string(),
    };

    println!("pgvault Configuration");
    println!("=====================");
    row("Database:", db.display_target());
    row("Driver:", &db.driver);
    row(
        "Password:",
        if db.password.is_empty() { "(none)" } else { "********" },
    );
    row("Admin database:", &backup.admin_database);
    println!();
    row("Backup directory:", backup.backup_dir.display());
    row("Retention:", format!("{} day(s)", backup.retention_days));
    row("Compression:", backup.compression);
    row("Drop on restore:", backup.drop_before_restore);
    row("Verify on restore:", backup.verify_checksum_on_restore);
    row("Tool timeout:", timeout);
    println!();
    row("Log file:", settings.logging.log_file.display());
    row("Log level:", &settings.logging.level);
}

fn row(label: &str, value: impl std::fmt::Display) {
    println!("{:<19}{}", label, value);
}
