//! Embedding provider chain for the mneme memory store.
//!
//! Text is turned into unit-norm vectors by the first provider in an ordered
//! chain that answers with a usable batch. The chain always ends with a
//! deterministic character fallback, so embedding never fails.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Embedder (chain)                       │
//! │  - embed() -> Embedded { vectors, model}│
//! │  - embed_with(provider) -> Result       │
//! └─────────────────────────────────────────┘
//!                    │
//!     ┌──────────────┼──────────────┐
//!     ▼              ▼              ▼
//! ┌────────┐   ┌──────────┐   ┌──────────────┐
//! │ Remote │   │  Local   │   │ CharFallback │
//! └────────┘   └──────────┘   └──────────────┘
//! ```

pub mod chain;
pub mod error;
pub mod factory;
pub mod fallback;
pub mod provider;
pub mod remote;

#[cfg(feature = "local-embeddings")]
pub mod local;

pub use chain::{Embedded, Embedder, SharedEmbedder};
pub use error::{EmbedError, Result};
pub use factory::{EmbedderSpec, LocalSpec, RemoteSpec, build_embedder, default_local_model_dir};
pub use fallback::{CHAR_FALLBACK_ID, CharFallbackEmbedder, DEFAULT_FALLBACK_DIMENSIONS};
pub use provider::{EmbeddingProvider, SharedProvider, dot, normalize, validate_batch};
pub use remote::{RemoteEmbedder, RemoteEmbedderConfig};

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;
