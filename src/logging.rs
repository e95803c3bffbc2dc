//! Logging setup
//!
//! Installs a global `tracing` subscriber with two outputs: human-readable
//! lines on stderr and an append-only log file without ANSI colors. Both share
//! a filter built from the configured level. Stdout carries command output
//! only.

use std::fs::{self, OpenOptions};
use std::sync::Mutex;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;
use crate::error::{VaultError, VaultResult};

/// Initialize the global subscriber
///
/// `verbose` forces the `debug` level regardless of configuration.
pub fn init(settings: &LoggingSettings, verbose: bool) -> VaultResult<()> {
    let (level, fallback) = resolve_level(&settings.level, verbose);

    if let Some(parent) = settings.log_file.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                VaultError::Io(format!(
                    "Failed to create log directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&settings.log_file)
        .map_err(|e| {
            VaultError::Io(format!(
                "Failed to open log file {}: {}",
                settings.log_file.display(),
                e
            ))
        })?;

    tracing_subscriber::registry()
        .with(EnvFilter::default().add_directive(level.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .map_err(|e| VaultError::Config(format!("Failed to initialize logging: {}", e)))?;

    if fallback {
        tracing::warn!(level = %settings.level, "unknown log level, falling back to info");
    }
    tracing::debug!(log_file = %settings.log_file.display(), "logging initialized");
    Ok(())
}

/// Resolve the level filter; the flag reports a fallback to `info`
fn resolve_level(level: &str, verbose: bool) -> (LevelFilter, bool) {
    if verbose {
        return (LevelFilter::DEBUG, false);
    }
    let level = level.trim();
    if level.is_empty() {
        return (LevelFilter::INFO, true);
    }
    let level = match level.to_ascii_uppercase().as_str() {
        "WARNING" => "warn",
        "CRITICAL" | "FATAL" => "error",
        _ => level,
    };
    match level.parse::<LevelFilter>() {
        Ok(filter) => (filter, false),
        Err(_) => (LevelFilter::INFO, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_level_is_case_insensitive() {
        assert_eq!(resolve_level("DEBUG", false), (LevelFilter::DEBUG, false));
        assert_eq!(resolve_level("warn", false), (LevelFilter::WARN, false));
    }

    #[test]
    fn test_long_level_names_map_to_tracing_levels() {
        assert_eq!(resolve_level("WARNING", false), (LevelFilter::WARN, false));
        assert_eq!(resolve_level("critical", false), (LevelFilter::ERROR, false));
        assert_eq!(resolve_level("FATAL", false), (LevelFilter::ERROR, false));
    }

    #[test]
    fn test_verbose_forces_debug() {
        assert_eq!(resolve_level("ERROR", true), (LevelFilter::DEBUG, false));
    }

    #[test]
    fn test_resolve_level_falls_back_on_garbage() {
        assert_eq!(resolve_level("loud", false), (LevelFilter::INFO, true));
        assert_eq!(resolve_level("", false), (LevelFilter::INFO, true));
    }
}
