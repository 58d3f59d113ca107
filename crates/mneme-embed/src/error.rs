//! Error types for embedding providers.

use thiserror::Error;

/// Result type alias using the embedding error type.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type for embedding operations.
///
/// Provider errors never escape [`Embedder::embed`](crate::Embedder::embed);
/// the chain logs them and falls through. They surface only from
/// single-provider calls such as [`Embedder::embed_with`](crate::Embedder::embed_with)
/// and from construction.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// HTTP transport error (connection refused, timeout, TLS).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered but reported a failure.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The provider returned vectors that cannot be used.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Provider configuration is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (model loading, tensor shapes, client construction).
    #[error("Internal error: {0}")]
    Internal(String),
}
