//! Deterministic character-histogram embeddings.
//!
//! The last link of every chain. It needs no model and no network, so it
//! cannot fail; the vectors only capture surface overlap between texts.

use async_trait::async_trait;

use crate::error::Result;
use crate::provider::{EmbeddingProvider, normalize};

/// Provenance tag for vectors produced by [`CharFallbackEmbedder`].
pub const CHAR_FALLBACK_ID: &str = "char_fallback";

/// Default output dimension (same as all-MiniLM-L6-v2).
pub const DEFAULT_FALLBACK_DIMENSIONS: usize = 384;

/// Hashes lower-cased character codes and adjacent character pairs into a
/// fixed number of buckets, then L2-normalizes.
#[derive(Debug, Clone)]
pub struct CharFallbackEmbedder {
    dimensions: usize,
}

impl CharFallbackEmbedder {
    /// Create a fallback embedder producing `dimensions`-wide vectors.
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Embed one text.
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dim = self.dimensions as u64;
        let mut vector = vec![0.0f32; self.dimensions];

        let codes: Vec<u64> = text.to_lowercase().chars().map(|c| c as u64).collect();
        if codes.is_empty() {
            vector[0] = 1.0;
            return vector;
        }

        for &code in &codes {
            vector[(code % dim) as usize] += 1.0;
        }
        for pair in codes.windows(2) {
            let bucket = (31 * pair[0] + pair[1]) % dim;
            vector[bucket as usize] += 1.0;
        }

        // Non-empty text always lands in at least one bucket
        normalize(&mut vector);
        vector
    }

    /// Embed a batch of texts.
    pub fn embed_texts(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts.iter().map(|t| self.embed_text(t)).collect()
    }
}

impl Default for CharFallbackEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_DIMENSIONS)
    }
}

#[async_trait]
impl EmbeddingProvider for CharFallbackEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(self.embed_texts(texts))
    }

    fn identifier(&self) -> &str {
        CHAR_FALLBACK_ID
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions)
    }
}
