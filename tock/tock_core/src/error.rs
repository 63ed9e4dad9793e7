//! Error types for the Tock scheduler.
//!
//! Errors are organized by subsystem. The root error type, `Error`, wraps
//! the subsystem errors so callers can handle everything uniformly at the
//! top level.
//!
//! Misuse of the delayed task manager (missing payloads, double start) is a
//! caller bug and is reported by assertion, not through these types. The
//! errors here cover the environment: runners that stopped accepting work
//! and configuration that could not be read.

use thiserror::Error;

/// Root error type for Tock.
#[derive(Debug, Error)]
pub enum Error {
    /// Task runner and scheduling errors
    #[error("Concurrency error: {0}")]
    Concurrency(#[from] ConcurrencyError),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to posting work to task runners.
#[derive(Debug, Error)]
pub enum ConcurrencyError {
    /// The runner has been shut down and no longer accepts tasks
    #[error("Task runner shut down: {0}")]
    RunnerShutDown(String),
}

/// Errors related to scheduler configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration source could not be read
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    /// The configuration could not be parsed
    #[error("Failed to parse configuration: {0}")]
    ParseFailed(String),

    /// A configuration value is out of range or inconsistent
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type used throughout Tock.
pub type Result<T> = std::result::Result<T, Error>;
