//! Structured error types for the bmclust workspace.

use thiserror::Error;

/// Unified error type for all bmclust operations.
#[derive(Debug, Error)]
pub enum BmclustError {
    /// I/O error (file not found, permission denied, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error (malformed Newick string or trait table)
    #[error("parse error: {0}")]
    Parse(String),

    /// Invalid input (bad arguments, out-of-range site indices, unknown taxa)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Tree shape the estimator cannot handle (wrong arity, unary root)
    #[error("unsupported topology: {0}")]
    Topology(String),

    /// Numerical breakdown during estimation (NaN, non-positive pruned length)
    #[error("numerical failure: {0}")]
    Numerical(String),

    /// Catch-all for other errors
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the bmclust workspace.
pub type Result<T> = std::result::Result<T, BmclustError>;
