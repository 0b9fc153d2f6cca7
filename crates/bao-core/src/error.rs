//! Error types for baofit

use std::path::PathBuf;

use thiserror::Error;

/// baofit error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A data file could not be opened.
    #[error("unable to open {}: {source}", path.display())]
    Open {
        /// File that failed to open.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },

    /// Malformed line in an input file.
    #[error("{}:{line}: {message}", path.display())]
    Parse {
        /// File being read.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
        /// What was wrong with the line.
        message: String,
    },

    /// Coordinate or index outside its valid range.
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Cholesky factorization failed.
    #[error("Not positive-definite: {0}")]
    NotPositiveDefinite(String),

    /// Operation called in the wrong lifecycle state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Datasets with different populated-bin layouts were combined.
    #[error("Layout mismatch: {0}")]
    LayoutMismatch(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
