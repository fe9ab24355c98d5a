//! Error types for Project Tephra.
//!
//! The per-frame numeric path never returns errors: topology gaps fall back
//! to boundary fills and non-convergence is reported through diagnostics.
//! Errors exist for the configuration and persistence surfaces.

use thiserror::Error;

/// Top-level error type for Tephra operations.
#[derive(Debug, Error)]
pub enum TephraError {
    /// Configuration file errors
    #[error("Config error: {0}")]
    Config(String),

    /// Chunk snapshot/persistence errors
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema version mismatch
    #[error("Schema version mismatch: expected {expected}, got {actual}")]
    VersionMismatch {
        /// Expected version
        expected: String,
        /// Actual version found
        actual: String,
    },
}

/// Result type alias for Tephra operations.
pub type TephraResult<T> = Result<T, TephraError>;
