//! The ordered provider chain.
//!
//! ```text
//! embed(texts)
//!   ├─ remote service   ok? ─► validated, normalized, tagged "<remote model>"
//!   ├─ local model      ok? ─► validated, normalized, tagged "<local model>"
//!   └─ char fallback        ─► always succeeds, tagged "char_fallback"
//! ```

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{EmbedError, Result};
use crate::fallback::{CHAR_FALLBACK_ID, CharFallbackEmbedder};
use crate::provider::{SharedProvider, validate_batch};

/// Vectors for one `embed` call plus the provider that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedded {
    /// One unit-norm vector per input text, in input order.
    pub vectors: Vec<Vec<f32>>,
    /// Identifier of the provider that served the call.
    pub model: String,
}

/// Ordered embedding providers ending in the infallible character fallback.
pub struct Embedder {
    providers: Vec<SharedProvider>,
    fallback: CharFallbackEmbedder,
    last_used: RwLock<String>,
}

/// An embedder that can be shared across threads.
pub type SharedEmbedder = Arc<Embedder>;

impl Embedder {
    /// Create a chain from providers in priority order.
    pub fn new(providers: Vec<SharedProvider>, fallback: CharFallbackEmbedder) -> Self {
        Self {
            providers,
            fallback,
            last_used: RwLock::new(CHAR_FALLBACK_ID.to_string()),
        }
    }

    /// A chain with no providers besides the character fallback.
    pub fn fallback_only(dimensions: usize) -> Self {
        Self::new(Vec::new(), CharFallbackEmbedder::new(dimensions))
    }

    /// Identifiers of every link, in resolution order.
    pub fn provider_ids(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.identifier().to_string())
            .chain(std::iter::once(CHAR_FALLBACK_ID.to_string()))
            .collect()
    }

    /// Identifier of the provider that served the most recent call.
    ///
    /// `char_fallback` until a call completes.
    pub fn model_used(&self) -> String {
        self.last_used.read().clone()
    }

    /// Embed texts with the first provider that succeeds.
    ///
    /// Never fails: provider errors are logged and the chain falls through,
    /// ending at the character fallback.
    pub async fn embed(&self, texts: &[String]) -> Embedded {
        if texts.is_empty() {
            return Embedded {
                vectors: Vec::new(),
                model: self.model_used(),
            };
        }

        for provider in &self.providers {
            let id = provider.identifier();
            match run_validated(provider, texts).await {
                Ok(vectors) => {
                    debug!(provider = id, count = vectors.len(), "Embedded batch");
                    return self.served(vectors, id);
                }
                Err(e) => {
                    warn!(provider = id, error = %e, "Embedding provider failed, falling through");
                }
            }
        }

        let vectors = self.fallback.embed_texts(texts);
        self.served(vectors, CHAR_FALLBACK_ID)
    }

    /// Embed a single text with the chain.
    pub async fn embed_one(&self, text: &str) -> (Vec<f32>, String) {
        let Embedded { vectors, model } = self.embed(&[text.to_string()]).await;
        (vectors.into_iter().next().unwrap_or_default(), model)
    }

    /// Embed texts with one named provider and no fallthrough.
    pub async fn embed_with(&self, provider_id: &str, texts: &[String]) -> Result<Embedded> {
        if provider_id == CHAR_FALLBACK_ID {
            let vectors = self.fallback.embed_texts(texts);
            return Ok(self.served(vectors, CHAR_FALLBACK_ID));
        }

        let provider = self
            .providers
            .iter()
            .find(|p| p.identifier() == provider_id)
            .ok_or_else(|| {
                EmbedError::Config(format!("Unknown embedding provider '{}'", provider_id))
            })?;

        if texts.is_empty() {
            return Ok(Embedded {
                vectors: Vec::new(),
                model: provider_id.to_string(),
            });
        }

        let vectors = run_validated(provider, texts).await?;
        Ok(self.served(vectors, provider_id))
    }

    fn served(&self, vectors: Vec<Vec<f32>>, id: &str) -> Embedded {
        let model = id.to_string();
        *self.last_used.write() = model.clone();
        Embedded { vectors, model }
    }
}

async fn run_validated(provider: &SharedProvider, texts: &[String]) -> Result<Vec<Vec<f32>>> {
    let raw = provider.embed_batch(texts).await?;
    validate_batch(raw, texts.len())
}
