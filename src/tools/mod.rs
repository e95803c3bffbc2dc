//! External tool invocation
//!
//! Every external program pgvault drives (`pg_dump`, `psql`, `gzip`,
//! `gunzip`) is described by a [`ToolCommand`] and executed through a
//! [`ToolRunner`]. [`SystemRunner`] spawns real processes; tests substitute a
//! scripted runner.

mod postgres;
#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::{runtime, time};
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

pub use postgres::{quote_identifier, PgTools};

/// A single external process invocation
#[derive(Clone)]
pub struct ToolCommand {
    /// Program name, resolved through `PATH`
    pub program: String,
    /// Arguments, never containing secrets
    pub args: Vec<String>,
    /// Extra environment variables for the child only
    pub envs: Vec<(String, Zeroizing<String>)>,
    /// Redirect the child's stdout into this file instead of capturing it
    pub stdout_path: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            stdout_path: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: &str) -> Self {
        self.envs.push((key.into(), Zeroizing::new(value.to_string())));
        self
    }

    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_path = Some(path.into());
        self
    }

    /// Value following `flag` in the argument list
    pub fn arg_after(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Command line for logs; environment values are never included
    pub fn describe(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        if let Some(path) = &self.stdout_path {
            line.push_str(&format!(" > {}", path.display()));
        }
        line
    }
}

impl fmt::Debug for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys: Vec<&str> = self.envs.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("ToolCommand")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env_keys", &env_keys)
            .field("stdout_path", &self.stdout_path)
            .finish()
    }
}

/// What a finished tool reported
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    /// Captured stdout (empty when redirected to a file)
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl ToolOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Turn a non-zero exit into a `ToolFailed` error
    pub fn into_result(self, tool: &str) -> VaultResult<ToolOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(VaultError::ToolFailed {
                tool: tool.to_string(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Runs external tools
pub trait ToolRunner {
    /// Run `command` to completion
    ///
    /// A tool that starts and exits non-zero is reported through
    /// [`ToolOutput::code`], not as an error.
    fn run(&self, command: &ToolCommand) -> VaultResult<ToolOutput>;
}

/// Runs tools as real child processes
///
/// Each call drives the child on a current-thread tokio runtime. With a
/// timeout set, waiting for exit and draining both pipes share one deadline;
/// on expiry the child is killed and `ToolTimeout` is returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl ToolRunner for SystemRunner {
    fn run(&self, command: &ToolCommand) -> VaultResult<ToolOutput> {
        let runtime = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| VaultError::Io(format!("Failed to start process runtime: {}", e)))?;
        runtime.block_on(run_child(command, self.timeout))
    }
}

async fn run_child(command: &ToolCommand, timeout: Option<Duration>) -> VaultResult<ToolOutput> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &command.envs {
        cmd.env(key, value.as_str());
    }

    match &command.stdout_path {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                VaultError::Io(format!("Failed to create {}: {}", path.display(), e))
            })?;
            cmd.stdout(Stdio::from(file));
        }
        None => {
            cmd.stdout(Stdio::piped());
        }
    }

    let mut child = cmd.spawn().map_err(|e| VaultError::ToolLaunch {
        tool: command.program.clone(),
        reason: e.to_string(),
    })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let finished = async {
        tokio::try_join!(read_pipe(stdout), read_pipe(stderr), child.wait())
    };

    let outcome = match timeout {
        Some(limit) => time::timeout(limit, finished).await.ok(),
        None => Some(finished.await),
    };

    let Some(result) = outcome else {
        let _ = child.start_kill();
        let _ = child.wait().await;
        return Err(VaultError::ToolTimeout {
            tool: command.program.clone(),
            seconds: timeout.map_or(0, |limit| limit.as_secs()),
        });
    };

    let (stdout, stderr, status) = result?;
    Ok(ToolOutput {
        code: status.code(),
        stdout,
        stderr,
    })
}

/// Read a child pipe to EOF; an absent pipe reads as empty
async fn read_pipe<P: AsyncRead + Unpin>(pipe: Option<P>) -> std::io::Result<String> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_omits_environment() {
        let cmd = ToolCommand::new("pg_dump")
            .args(["-h", "localhost", "-d", "app"])
            .env("PGPASSWORD", "hunter2");

        assert_eq!(cmd.describe(), "pg_dump -h localhost -d app");
        assert!(!format!("{:?}", cmd).contains("hunter2"));
        assert_eq!(cmd.arg_after("-d"), Some("app"));
        assert_eq!(cmd.arg_after("-f"), None);
    }

    #[test]
    fn test_into_result_maps_exit_codes() {
        let ok = ToolOutput {
            code: Some(0),
            ..Default::default()
        };
        assert!(ok.into_result("psql").is_ok());

        let failed = ToolOutput {
            code: Some(2),
            stderr: "  boom\n".into(),
            ..Default::default()
        };
        match failed.into_result("psql") {
            Err(VaultError::ToolFailed { tool, code, stderr }) => {
                assert_eq!(tool, "psql");
                assert_eq!(code, Some(2));
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_missing_program_is_a_launch_error() {
        let runner = SystemRunner::new(None);
        let err = runner
            .run(&ToolCommand::new("pgvault-definitely-not-installed"))
            .unwrap_err();
        assert!(matches!(err, VaultError::ToolLaunch { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_output_and_status() {
        let runner = SystemRunner::new(Some(Duration::from_secs(10)));
        let output = runner
            .run(&ToolCommand::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_passes_env_and_redirects_stdout() {
        let temp = tempfile::TempDir::new().unwrap();
        let target = temp.path().join("out.txt");
        let runner = SystemRunner::new(None);
        let output = runner
            .run(
                &ToolCommand::new("sh")
                    .args(["-c", "printf %s \"$PGPASSWORD\""])
                    .env("PGPASSWORD", "s3cret")
                    .stdout_to(&target),
            )
            .unwrap();
        assert!(output.success());
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "s3cret");
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_kills_on_timeout() {
        let runner = SystemRunner::new(Some(Duration::from_millis(200)));
        let err = runner
            .run(&ToolCommand::new("sleep").arg("5"))
            .unwrap_err();
        assert!(matches!(err, VaultError::ToolTimeout { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_covers_pipes_held_by_grandchildren() {
        let runner = SystemRunner::new(Some(Duration::from_millis(200)));
        let started = std::time::Instant::now();
        let err = runner
            .run(&ToolCommand::new("sh").args(["-c", "sleep 3 & exit 0"]))
            .unwrap_err();

        assert!(matches!(err, VaultError::ToolTimeout { ref tool, .. } if tool == "sh"));
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
