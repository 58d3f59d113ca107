//! The provider trait and vector helpers shared by every backend.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{EmbedError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Provider Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A single embedding backend.
///
/// Providers may fail; the [`Embedder`](crate::Embedder) chain decides what
/// to do about it. Output does not need to be normalized, the chain
/// validates and normalizes every batch before handing it out.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, one vector per input in the same order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Provenance tag recorded alongside every vector this provider produces.
    fn identifier(&self) -> &str;

    /// Output dimensionality, when known before the first call.
    fn dimensions(&self) -> Option<usize>;
}

/// A provider that can be shared across threads.
pub type SharedProvider = Arc<dyn EmbeddingProvider>;

// ─────────────────────────────────────────────────────────────────────────────
// Vector Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Scale a vector to unit length in place.
///
/// Returns `false` (and leaves the vector untouched) when its norm is zero or
/// not finite.
pub fn normalize(vector: &mut [f32]) -> bool {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm <= f32::EPSILON {
        return false;
    }
    for x in vector.iter_mut() {
        *x /= norm;
    }
    true
}

/// Inner product of two vectors. Equals cosine similarity for unit vectors.
///
/// Returns `None` when the dimensions differ.
pub fn dot(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() {
        return None;
    }
    Some(a.iter().zip(b).map(|(x, y)| x * y).sum())
}

/// Check a provider's batch and normalize it.
///
/// The batch must hold `expected` vectors of one shared, non-zero dimension
/// with only finite values, and no vector may be all zeros.
pub fn validate_batch(mut vectors: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != expected {
        return Err(EmbedError::InvalidResponse(format!(
            "expected {} vectors, got {}",
            expected,
            vectors.len()
        )));
    }

    let dim = vectors.first().map(Vec::len).unwrap_or(0);
    if expected > 0 && dim == 0 {
        return Err(EmbedError::InvalidResponse(
            "provider returned empty vectors".to_string(),
        ));
    }

    for (i, vector) in vectors.iter_mut().enumerate() {
        if vector.len() != dim {
            return Err(EmbedError::InvalidResponse(format!(
                "ragged batch: vector {} has dimension {}, expected {}",
                i,
                vector.len(),
                dim
            )));
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(EmbedError::InvalidResponse(format!(
                "vector {} contains non-finite values",
                i
            )));
        }
        if !normalize(vector) {
            return Err(EmbedError::InvalidResponse(format!(
                "vector {} has zero norm",
                i
            )));
        }
    }

    Ok(vectors)
}
