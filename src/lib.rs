//! pgvault - PostgreSQL backup and restore utility
//!
//! This library drives the stock PostgreSQL client tools to take, rotate,
//! verify and restore plain SQL dumps.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Layered configuration (defaults, environment, JSON file)
//! - `error`: Custom error types
//! - `logging`: tracing subscriber setup
//! - `tools`: External process invocation (`pg_dump`, `psql`, `gzip`, `gunzip`)
//! - `backup`: Backup pipeline, restore, retention and self-test
//! - `cli`: Command handlers
//!
//! # Example
//!
//! ```rust,ignore
//! use pgvault::config::Settings;
//!
//! let settings = Settings::resolve(None)?;
//! pgvault::logging::init(&settings.logging, false)?;
//! ```

pub mod backup;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod tools;

pub use error::VaultError;
