//! Build an [`Embedder`] chain from application config.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mneme_config::EmbeddingConfig;
use tracing::info;

use crate::chain::Embedder;
use crate::error::Result;
use crate::fallback::CharFallbackEmbedder;
use crate::provider::SharedProvider;
use crate::remote::{RemoteEmbedder, RemoteEmbedderConfig};

/// Remote link of the chain.
#[derive(Debug, Clone)]
pub struct RemoteSpec {
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Local ONNX link of the chain.
#[derive(Debug, Clone)]
pub struct LocalSpec {
    /// Model name, also the provenance tag.
    pub model_name: String,
    /// ONNX model path. Defaults to the platform data dir.
    pub model_path: Option<PathBuf>,
    /// tokenizer.json path. Defaults to the platform data dir.
    pub tokenizer_path: Option<PathBuf>,
    pub dimensions: usize,
}

/// Provider-agnostic description of the chain to build.
#[derive(Debug, Clone)]
pub struct EmbedderSpec {
    pub remote: Option<RemoteSpec>,
    pub local: Option<LocalSpec>,
    /// Dimension of the character fallback.
    pub fallback_dimensions: usize,
}

impl EmbedderSpec {
    /// Translate the `[embedding]` config section.
    ///
    /// A remote link needs both `enabled` and a URL.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let remote = match config.remote.url {
            Some(ref url) if config.remote.enabled && !url.is_empty() => Some(RemoteSpec {
                url: url.clone(),
                model: config.remote.model.clone(),
                api_key: config.remote.api_key.clone(),
                timeout: config.remote.timeout(),
            }),
            _ => None,
        };

        let local = config.local.enabled.then(|| LocalSpec {
            model_name: config.local.model_name.clone(),
            model_path: config.local.model_path.clone(),
            tokenizer_path: config.local.tokenizer_path.clone(),
            dimensions: config.local.dimensions,
        });

        Self {
            remote,
            local,
            fallback_dimensions: config.fallback_dimensions,
        }
    }

    /// A spec with only the character fallback.
    pub fn fallback_only(dimensions: usize) -> Self {
        Self {
            remote: None,
            local: None,
            fallback_dimensions: dimensions,
        }
    }
}

/// Build the provider chain described by `spec`.
///
/// A local model that is unavailable (feature disabled, files missing, load
/// failure) is left out of the chain rather than failing the build.
pub fn build_embedder(spec: &EmbedderSpec) -> Result<Embedder> {
    let mut providers: Vec<SharedProvider> = Vec::new();

    if let Some(ref remote) = spec.remote {
        let mut config = RemoteEmbedderConfig::new(&remote.url, &remote.model)
            .with_timeout(remote.timeout);
        if let Some(ref key) = remote.api_key {
            config = config.with_api_key(key);
        }
        providers.push(Arc::new(RemoteEmbedder::new(config)?));
    }

    if let Some(ref local) = spec.local
        && let Some(provider) = load_local(local)
    {
        providers.push(provider);
    }

    let embedder = Embedder::new(
        providers,
        CharFallbackEmbedder::new(spec.fallback_dimensions),
    );
    info!(chain = ?embedder.provider_ids(), "Embedding chain ready");
    Ok(embedder)
}

#[cfg(feature = "local-embeddings")]
fn load_local(spec: &LocalSpec) -> Option<SharedProvider> {
    use crate::local::LocalEmbedder;

    let (default_model, default_tokenizer) = default_local_model_dir(&spec.model_name)
        .map(|dir| LocalEmbedder::files_in(&dir))
        .unzip();
    let model_path = spec.model_path.clone().or(default_model)?;
    let tokenizer_path = spec.tokenizer_path.clone().or(default_tokenizer)?;

    if !model_path.exists() || !tokenizer_path.exists() {
        info!(
            model = %spec.model_name,
            path = %model_path.display(),
            "Local embedding model not found, skipping"
        );
        return None;
    }

    match LocalEmbedder::load(&spec.model_name, &model_path, &tokenizer_path, spec.dimensions) {
        Ok(embedder) => Some(Arc::new(embedder)),
        Err(e) => {
            tracing::warn!(model = %spec.model_name, error = %e, "Failed to load local embedding model");
            None
        }
    }
}

#[cfg(not(feature = "local-embeddings"))]
fn load_local(spec: &LocalSpec) -> Option<SharedProvider> {
    tracing::debug!(
        model = %spec.model_name,
        "Local embeddings requested but 'local-embeddings' feature is not enabled"
    );
    None
}

/// Default directory for a local embedding model's files.
pub fn default_local_model_dir(model_name: &str) -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("mneme").join("models").join(model_name))
}
