//! Error types for the Phalanx library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`PhalanxError`] enum. Execution strategy decisions (slicing, backpressure,
//! early termination) never surface as errors; only configuration problems,
//! genuine slice execution failures and cancellation do.
//!
//! # Examples
//!
//! ```
//! use phalanx::error::{PhalanxError, Result};
//!
//! fn example_operation() -> Result<()> {
//!     Err(PhalanxError::invalid_argument("top_k must be greater than zero"))
//! }
//!
//! match example_operation() {
//!     Ok(_) => println!("Success"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Phalanx operations.
#[derive(Error, Debug)]
pub enum PhalanxError {
    /// I/O errors (configuration files, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Rejected configuration (engine config or per-search options)
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid argument passed to an API
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Query-related errors (malformed sort specs, unsupported fields, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// Segment access errors raised while scanning
    #[error("Segment error: {0}")]
    Segment(String),

    /// A slice task failed while executing
    #[error("Slice {slice} failed: {message}")]
    SliceExecution {
        /// Position of the failed slice in the slice plan.
        slice: usize,
        /// Failure description.
        message: String,
    },

    /// Operation cancelled
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// Worker pool errors (spawn failures, disconnected workers)
    #[error("Thread pool error: {0}")]
    ThreadPool(String),

    /// Internal invariant violations
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Error with context added at the command line edge
    #[error("{0:#}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with PhalanxError.
pub type Result<T> = std::result::Result<T, PhalanxError>;

impl PhalanxError {
    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        PhalanxError::InvalidConfig(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        PhalanxError::InvalidArgument(msg.into())
    }

    /// Create a new query error.
    pub fn query<S: Into<String>>(msg: S) -> Self {
        PhalanxError::Query(msg.into())
    }

    /// Create a new segment error.
    pub fn segment<S: Into<String>>(msg: S) -> Self {
        PhalanxError::Segment(msg.into())
    }

    /// Create a new slice execution error.
    pub fn slice_execution<S: Into<String>>(slice: usize, msg: S) -> Self {
        PhalanxError::SliceExecution {
            slice,
            message: msg.into(),
        }
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        PhalanxError::OperationCancelled(msg.into())
    }

    /// Create a new thread pool error.
    pub fn thread_pool<S: Into<String>>(msg: S) -> Self {
        PhalanxError::ThreadPool(msg.into())
    }

    /// Create a new internal error.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        PhalanxError::Internal(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        PhalanxError::Other(msg.into())
    }

    /// Whether this error represents a cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PhalanxError::OperationCancelled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = PhalanxError::invalid_config("top_k must be positive");
        assert_eq!(
            error.to_string(),
            "Invalid configuration: top_k must be positive"
        );

        let error = PhalanxError::slice_execution(3, "segment read failed");
        assert_eq!(error.to_string(), "Slice 3 failed: segment read failed");

        let error = PhalanxError::query("empty sort");
        assert_eq!(error.to_string(), "Query error: empty sort");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let phalanx_error = PhalanxError::from(io_error);

        match phalanx_error {
            PhalanxError::Io(_) => {} // Expected
            _ => panic!("Expected IO error variant"),
        }
    }

    #[test]
    fn test_cancellation_classification() {
        assert!(PhalanxError::cancelled("query q1").is_cancellation());
        assert!(!PhalanxError::internal("boom").is_cancellation());
    }
}
