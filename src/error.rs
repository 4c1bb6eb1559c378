//! Error types for ghfixture

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for ghfixture operations
pub type Result<T> = std::result::Result<T, FixtureError>;

/// Errors that can occur in ghfixture
#[derive(Debug, Error)]
pub enum FixtureError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Stub mapping could not be loaded or compiled
    #[error("Invalid stub mapping: {0}")]
    InvalidMapping(String),

    /// Request/response too large
    #[error("Data too large: {size} bytes exceeds limit of {limit} bytes")]
    DataTooLarge {
        /// Actual size
        size: usize,
        /// Size limit
        limit: usize,
    },

    /// Request carried more headers than allowed
    #[error("Too many headers: {count} exceeds limit of {limit}")]
    TooManyHeaders {
        /// Actual header count
        count: usize,
        /// Header limit
        limit: usize,
    },

    /// Forwarding to the upstream failed
    #[error("Upstream request failed: {0}")]
    Upstream(String),

    /// Lifecycle call made in the wrong state
    #[error("Controller is {actual}, expected {expected}")]
    InvalidState {
        /// State the operation requires
        expected: &'static str,
        /// State the controller was in
        actual: &'static str,
    },

    /// Requests matched no rule at all
    #[error("{} request(s) did not match any stub: {}", .0.len(), .0.join(", "))]
    UnmatchedRequests(Vec<String>),

    /// Fixture reformatting aborted
    #[error("Files could not be written ({})", path.display())]
    FilesNotWritten {
        /// File being processed when the walk failed
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: Box<FixtureError>,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}
