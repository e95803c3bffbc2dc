//! PostgreSQL and gzip command builders

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{ToolCommand, ToolOutput, ToolRunner};
use crate::config::ConnectionConfig;
use crate::error::{VaultError, VaultResult};

/// Makes psql exit non-zero when any statement fails
const ON_ERROR_STOP: [&str; 2] = ["-v", "ON_ERROR_STOP=1"];

/// Builds and runs every external command pgvault needs
///
/// The database name is always an explicit argument so callers can target a
/// database other than the configured one without touching configuration.
pub struct PgTools<R> {
    connection: ConnectionConfig,
    admin_database: String,
    runner: R,
}

impl<R: ToolRunner> PgTools<R> {
    pub fn new(connection: ConnectionConfig, admin_database: impl Into<String>, runner: R) -> Self {
        Self {
            connection,
            admin_database: admin_database.into(),
            runner,
        }
    }

    /// The resolved connection target
    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    /// Database DROP/CREATE statements are issued from
    pub fn admin_database(&self) -> &str {
        &self.admin_database
    }

    /// The runner commands are executed with
    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Dump `database` into `output` with `pg_dump`
    pub fn dump(&self, database: &str, output: &Path) -> VaultResult<()> {
        let command = self
            .client("pg_dump", database)
            .arg("-f")
            .arg(path_arg(output));
        self.run_checked(&command).map(|_| ())
    }

    /// Load a plain SQL file into `database` with `psql -f`
    pub fn load_file(&self, database: &str, file: &Path) -> VaultResult<()> {
        let command = self
            .client("psql", database)
            .args(ON_ERROR_STOP)
            .arg("-f")
            .arg(path_arg(file));
        self.run_checked(&command).map(|_| ())
    }

    /// Run one SQL string against `database`, returning unaligned tuples-only stdout
    pub fn execute(&self, database: &str, sql: &str) -> VaultResult<String> {
        let command = self
            .client("psql", database)
            .args(ON_ERROR_STOP)
            .args(["-t", "-A", "-c", sql]);
        self.run_checked(&command).map(|output| output.stdout)
    }

    /// `DROP DATABASE IF EXISTS`, issued from the admin database
    pub fn drop_database(&self, name: &str) -> VaultResult<()> {
        let sql = format!("DROP DATABASE IF EXISTS {};", quote_identifier(name));
        self.execute(&self.admin_database, &sql).map(|_| ())
    }

    /// `CREATE DATABASE`, issued from the admin database
    pub fn create_database(&self, name: &str) -> VaultResult<()> {
        let sql = format!("CREATE DATABASE {};", quote_identifier(name));
        self.execute(&self.admin_database, &sql).map(|_| ())
    }

    /// Compress `path` in place with `gzip -f`, returning the `.gz` path
    pub fn compress(&self, path: &Path) -> VaultResult<PathBuf> {
        let command = ToolCommand::new("gzip").arg("-f").arg(path_arg(path));
        self.run_checked(&command)?;
        Ok(gz_path(path))
    }

    /// Decompress `source` into `dest` with `gunzip -c`, leaving `source` intact
    pub fn decompress(&self, source: &Path, dest: &Path) -> VaultResult<()> {
        let command = ToolCommand::new("gunzip")
            .arg("-c")
            .arg(path_arg(source))
            .stdout_to(dest);
        self.run_checked(&command).map(|_| ())
    }

    /// A libpq client command with connection flags and the password in the environment
    fn client(&self, program: &str, database: &str) -> ToolCommand {
        let conn = &self.connection;
        ToolCommand::new(program)
            .args(["-h", conn.host.as_str()])
            .args(["-p".to_string(), conn.port.to_string()])
            .args(["-U", conn.user.as_str()])
            .args(["-d", database])
            .env("PGPASSWORD", conn.password.as_str())
    }

    fn run_checked(&self, command: &ToolCommand) -> VaultResult<ToolOutput> {
        debug!(command = %command.describe(), "running external tool");
        let output = self.runner.run(command)?;
        output.into_result(&command.program)
    }
}

/// Quote a SQL identifier, doubling embedded quotes
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn gz_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".gz");
    PathBuf::from(name)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
