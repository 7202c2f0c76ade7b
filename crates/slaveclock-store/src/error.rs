//! Error types for the persistence layer.

use std::path::PathBuf;

/// Errors that can occur while loading or saving the offset record.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("state file I/O error at {path}: {source}")]
    Io {
        /// The file being accessed.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The record could not be encoded or decoded.
    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store refused the operation (used by test doubles).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
