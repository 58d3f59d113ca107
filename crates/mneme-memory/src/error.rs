//! Error types for the memory crate.

use thiserror::Error;

/// Errors that can occur in the memory crate.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Database connection or operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem operation failed (index artifact, backups, data dir).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid data or state.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A vector does not match the corpus dimensionality.
    #[error("Dimension mismatch: corpus uses {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The store lock could not be acquired in time.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A pinned embedding provider failed.
    #[error("Embedding error: {0}")]
    Embedding(String),
}

impl From<mneme_embed::EmbedError> for MemoryError {
    fn from(e: mneme_embed::EmbedError) -> Self {
        MemoryError::Embedding(e.to_string())
    }
}

/// Result type alias for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
