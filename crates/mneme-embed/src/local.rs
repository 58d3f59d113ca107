//! In-process sentence embeddings through ONNX Runtime.
//!
//! Compiled only with the `local-embeddings` feature.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ndarray::Array2;
use ort::session::Session;
use ort::session::builder::GraphOptimizationLevel;
use ort::value::Tensor;
use parking_lot::Mutex;
use tokenizers::Tokenizer;

use crate::error::{EmbedError, Result};
use crate::provider::EmbeddingProvider;

/// Sequences are run through the model in chunks of this size.
const CHUNK_SIZE: usize = 32;

/// Sentence-embedding model run in-process with attention-masked mean pooling.
pub struct LocalEmbedder {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    dimensions: usize,
    name: String,
}

impl LocalEmbedder {
    /// Load the ONNX model and its tokenizer.
    ///
    /// # Arguments
    /// * `name` - Model name, used as the provenance tag
    /// * `model_path` - `model.onnx`
    /// * `tokenizer_path` - HuggingFace `tokenizer.json`
    /// * `dimensions` - width of the pooled output
    pub fn load(
        name: impl Into<String>,
        model_path: impl AsRef<Path>,
        tokenizer_path: impl AsRef<Path>,
        dimensions: usize,
    ) -> Result<Self> {
        let session = Session::builder()
            .map_err(|e| EmbedError::Internal(format!("Failed to create ONNX session: {}", e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| EmbedError::Internal(format!("Failed to set optimization level: {}", e)))?
            .commit_from_file(model_path.as_ref())
            .map_err(|e| {
                EmbedError::Internal(format!(
                    "Failed to load ONNX model from {:?}: {}",
                    model_path.as_ref(),
                    e
                ))
            })?;

        let tokenizer = Tokenizer::from_file(tokenizer_path.as_ref()).map_err(|e| {
            EmbedError::Internal(format!(
                "Failed to load tokenizer from {:?}: {}",
                tokenizer_path.as_ref(),
                e
            ))
        })?;

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            dimensions,
            name: name.into(),
        })
    }

    /// Model and tokenizer paths inside a model directory.
    pub fn files_in(dir: &Path) -> (PathBuf, PathBuf) {
        (dir.join("model.onnx"), dir.join("tokenizer.json"))
    }

    /// Run ONNX inference on one padded batch of encodings.
    fn run_batch(&self, encodings: &[tokenizers::Encoding]) -> Result<Vec<Vec<f32>>> {
        let batch_size = encodings.len();
        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut input_ids = vec![0i64; batch_size * max_len];
        let mut attention_mask = vec![0i64; batch_size * max_len];
        let mut token_type_ids = vec![0i64; batch_size * max_len];

        for (i, enc) in encodings.iter().enumerate() {
            let offset = i * max_len;
            let ids = enc.get_ids();
            let mask = enc.get_attention_mask();
            let types = enc.get_type_ids();
            for j in 0..ids.len() {
                input_ids[offset + j] = ids[j] as i64;
                attention_mask[offset + j] = mask[j] as i64;
                token_type_ids[offset + j] = types[j] as i64;
            }
        }

        let shape = (batch_size, max_len);
        let to_tensor = |data: Vec<i64>| -> Result<Tensor<i64>> {
            let array = Array2::from_shape_vec(shape, data)
                .map_err(|e| EmbedError::Internal(format!("Array error: {}", e)))?;
            Tensor::from_array(array)
                .map_err(|e| EmbedError::Internal(format!("Input error: {}", e)))
        };
        let inputs = ort::inputs![
            "input_ids" => to_tensor(input_ids)?,
            "attention_mask" => to_tensor(attention_mask.clone())?,
            "token_type_ids" => to_tensor(token_type_ids)?,
        ];

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs)
            .map_err(|e| EmbedError::Internal(format!("ONNX inference failed: {}", e)))?;

        // (batch, seq_len, hidden)
        let hidden = outputs[0]
            .try_extract_array::<f32>()
            .map_err(|e| EmbedError::Internal(format!("Output extraction failed: {}", e)))?;
        let shape = hidden.shape().to_vec();
        if shape.len() != 3 || shape[0] != batch_size {
            return Err(EmbedError::Internal(format!(
                "Unexpected output shape {:?}",
                shape
            )));
        }
        let (seq_len, hidden_dim) = (shape[1], shape[2]);

        let mut results = Vec::with_capacity(batch_size);
        for i in 0..batch_size {
            let mask = &attention_mask[i * max_len..(i + 1) * max_len];
            let mut pooled = vec![0.0f32; hidden_dim];
            let mut count = 0.0f32;
            for (j, &m) in mask.iter().enumerate().take(seq_len) {
                if m > 0 {
                    for (k, slot) in pooled.iter_mut().enumerate() {
                        *slot += hidden[&[i, j, k][..]];
                    }
                    count += 1.0;
                }
            }
            if count > 0.0 {
                for v in &mut pooled {
                    *v /= count;
                }
            }
            results.push(pooled);
        }

        Ok(results)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = texts
            .iter()
            .map(|text| {
                self.tokenizer
                    .encode(text.as_str(), true)
                    .map_err(|e| EmbedError::Internal(format!("Tokenization failed: {}", e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut all = Vec::with_capacity(texts.len());
        for chunk in encodings.chunks(CHUNK_SIZE) {
            all.extend(self.run_batch(chunk)?);
        }
        Ok(all)
    }

    fn identifier(&self) -> &str {
        &self.name
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dimensions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_model_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let (model, tokenizer) = LocalEmbedder::files_in(dir.path());
        let result = LocalEmbedder::load("all-MiniLM-L6-v2", &model, &tokenizer, 384);
        assert!(result.is_err());
    }
}
