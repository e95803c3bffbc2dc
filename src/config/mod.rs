//! Configuration module for pgvault
//!
//! This module provides configuration management including:
//! - Connection string parsing
//! - Layered settings resolution (defaults, environment, config file)

pub mod connection;
pub mod settings;

pub use connection::{parse_connection_string, ConnectionConfig, ParsedConnection};
pub use settings::{BackupSettings, LoggingSettings, Settings};
