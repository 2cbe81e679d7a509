//! Common error types for the tempo job engine

use thiserror::Error;

/// Common result type for store and configuration operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the worker and the request layer
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid caller input (e.g. target BPM out of range)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation conflicts with the current row state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal error (corrupt row, unexpected value)
    #[error("Internal error: {0}")]
    Internal(String),
}
