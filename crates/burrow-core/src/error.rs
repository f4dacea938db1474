//! Error types for the store and configuration

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the lease and service tables
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite rejected the statement
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The row to update does not exist
    #[error("{table} row not found: {key}")]
    NotFound { table: &'static str, key: String },

    /// The row to insert already exists
    #[error("{table} row already exists: {key}")]
    Conflict { table: &'static str, key: String },

    /// The blocking worker running the statement failed
    #[error("store task failed: {0}")]
    Task(String),

    /// The connection mutex was poisoned by a panicking writer
    #[error("store connection poisoned")]
    Poisoned,

    /// I/O error while preparing the database location
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
