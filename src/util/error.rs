//! Error types for the work distribution layer.
//!
//! Scheduling exhaustion, cancellation and display mapping failures are not
//! errors; they are reported through return values. This enum only covers
//! construction and validation seams.

use thiserror::Error;

use crate::session::PassType;

/// Main error type for tilework operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Buffer rectangle or pass layout is inconsistent
    #[error("Invalid buffer parameters: {0}")]
    InvalidBufferParams(String),

    /// A pass required by an operation is not part of the buffer layout
    #[error("Render buffer has no {0:?} pass")]
    MissingPass(PassType),

    /// Device descriptor cannot back a path trace work
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    /// Settings (de)serialization failed
    #[error("Settings format error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an "other" error from a string.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Create an invalid buffer parameters error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidBufferParams(msg.into())
    }
}

/// Result type alias for tilework operations.
pub type Result<T> = std::result::Result<T, Error>;
