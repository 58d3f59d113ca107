//! HTTP embedding service client.
//!
//! The service accepts `{"texts": [...]}` and answers with
//! `{"embeddings": [[...], ...]}`, one vector per input in order. Older
//! deployments answer with the singular `embedding` key, which is accepted too.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EmbedError, Result};
use crate::provider::EmbeddingProvider;

/// Configuration for a remote embedding service.
#[derive(Debug, Clone)]
pub struct RemoteEmbedderConfig {
    /// Endpoint URL receiving the POST.
    pub url: String,
    /// Model name, used as the provenance tag.
    pub model: String,
    /// Optional bearer token.
    pub api_key: Option<String>,
    /// Request timeout.
    pub timeout: Duration,
}

impl RemoteEmbedderConfig {
    /// Create a config with the default 60s timeout and no API key.
    pub fn new(url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            model: model.into(),
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }

    /// Set the bearer token.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Embedding provider backed by an HTTP service.
pub struct RemoteEmbedder {
    client: Client,
    config: RemoteEmbedderConfig,
}

impl RemoteEmbedder {
    /// Create a new remote embedder.
    pub fn new(config: RemoteEmbedderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| EmbedError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    /// The endpoint this embedder posts to.
    pub fn url(&self) -> &str {
        &self.config.url
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest { texts };

        let mut builder = self.client.post(&self.config.url).json(&request);
        if let Some(ref key) = self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Backend(format!(
                "Embedding request failed: HTTP {} - {}",
                status, body
            )));
        }

        let result: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        debug!(
            url = %self.config.url,
            count = result.embeddings.len(),
            "Remote embedding batch received"
        );

        Ok(result.embeddings)
    }

    fn identifier(&self) -> &str {
        &self.config.model
    }

    fn dimensions(&self) -> Option<usize> {
        None
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    #[serde(alias = "embedding")]
    embeddings: Vec<Vec<f32>>,
}
