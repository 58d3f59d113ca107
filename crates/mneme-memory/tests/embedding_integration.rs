//! Integration tests for the store's use of the embedder chain: provenance,
//! re-embedding and remote fallback.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use mneme_embed::{
    CharFallbackEmbedder, EmbedError, Embedder, EmbeddingProvider, RemoteEmbedder,
    RemoteEmbedderConfig, SharedProvider,
};
use mneme_memory::{
    IndexKind, MemoryError, MemoryStore, ProgressCallback, ReembedProgress, StoreConfig,
};
use serial_test::serial;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ─────────────────────────────────────────────────────────────────────────────
// Test Providers
// ─────────────────────────────────────────────────────────────────────────────

/// Deterministic provider that succeeds for its first `ok_calls` calls.
struct CountingProvider {
    id: &'static str,
    dim: usize,
    ok_calls: usize,
    calls: AtomicUsize,
}

impl CountingProvider {
    fn new(id: &'static str, dim: usize, ok_calls: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            dim,
            ok_calls,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dim];
        v[0] = 1.0;
        for (i, b) in text.bytes().enumerate() {
            v[(i + b as usize) % self.dim] += b as f32 / 255.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    async fn embed_batch(&self, texts: &[String]) -> mneme_embed::Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.ok_calls {
            return Err(EmbedError::Backend("provider went away".to_string()));
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn identifier(&self) -> &str {
        self.id
    }

    fn dimensions(&self) -> Option<usize> {
        Some(self.dim)
    }
}

fn chain_of(provider: Arc<CountingProvider>, fallback_dim: usize) -> Arc<Embedder> {
    Arc::new(Embedder::new(
        vec![provider as SharedProvider],
        CharFallbackEmbedder::new(fallback_dim),
    ))
}

/// Write `n` entries with the fallback embedder into a store under `dir`.
async fn seed_with_fallback(dir: &std::path::Path, n: usize, dim: usize) {
    let store = MemoryStore::open(
        StoreConfig::in_dir(dir),
        Arc::new(Embedder::fallback_only(dim)),
    )
    .unwrap();
    for i in 0..n {
        store
            .add_memory(format!("note {}", i), ["seed"])
            .await
            .unwrap();
    }
}

fn models(store: &MemoryStore) -> Vec<String> {
    store
        .list_memories(usize::MAX)
        .into_iter()
        .map(|e| e.embedding_model)
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Re-embedding
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reembed_records_provenance_and_backup() {
    let dir = tempfile::tempdir().unwrap();
    seed_with_fallback(dir.path(), 5, 8).await;

    let provider = CountingProvider::new("service", 16, usize::MAX);
    let store = MemoryStore::open(StoreConfig::in_dir(dir.path()), chain_of(provider.clone(), 8)).unwrap();
    assert!(models(&store).iter().all(|m| m == "char_fallback"));

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let progress: ProgressCallback = Box::new(move |p: ReembedProgress| {
        counter.store(p.processed, Ordering::SeqCst);
        assert_eq!(p.total, 5);
    });

    let report = store.reembed_all(2, Some(&progress)).await.unwrap();
    assert_eq!(report.reembedded, 5);
    assert_eq!(report.total, 5);
    assert_eq!(report.model, "service");
    assert_eq!(seen.load(Ordering::SeqCst), 5);
    assert_eq!(provider.calls(), 3);

    let backup = report.backup.expect("file-backed store takes a backup");
    assert!(backup.exists());
    assert!(
        backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("memories.sqlite.bak_")
    );

    assert!(models(&store).iter().all(|m| m == "service"));
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.dimensions, Some(16));
    assert_eq!(stats.index_kind, IndexKind::Accelerated);
    assert_eq!(stats.index_size, 5);

    // Queries now go through the same provider and hit the new vectors
    let hits = store.search("note 3", 1).await.unwrap();
    assert_eq!(hits[0].text, "note 3");
}

#[tokio::test]
async fn test_reembed_partial_failure_keeps_committed_batches() {
    let dir = tempfile::tempdir().unwrap();
    seed_with_fallback(dir.path(), 5, 8).await;

    // Serves the first two batches, then fails
    let provider = CountingProvider::new("flaky", 8, 2);
    let store = MemoryStore::open(StoreConfig::in_dir(dir.path()), chain_of(provider.clone(), 8)).unwrap();

    let err = store.reembed_all(2, None).await.unwrap_err();
    assert!(matches!(err, MemoryError::Embedding(_)));
    assert_eq!(provider.calls(), 3);

    // Oldest four were rewritten, the last kept its old provenance
    let mut provenance = models(&store);
    provenance.reverse();
    assert_eq!(provenance, vec!["flaky", "flaky", "flaky", "flaky", "char_fallback"]);

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.count, 5);
    assert_eq!(stats.index_size, 5);

    // Committed batches survive a restart
    drop(store);
    let reopened = MemoryStore::open(
        StoreConfig::in_dir(dir.path()),
        Arc::new(Embedder::fallback_only(8)),
    )
    .unwrap();
    let mut reloaded = models(&reopened);
    reloaded.reverse();
    assert_eq!(reloaded, provenance);
}

#[tokio::test]
async fn test_reembed_in_memory_has_no_backup() {
    let provider = CountingProvider::new("service", 8, usize::MAX);
    let store = MemoryStore::open_in_memory(chain_of(provider, 8)).unwrap();
    store.add_memory("one", ["x"]).await.unwrap();

    let report = store.reembed_all(128, None).await.unwrap();
    assert_eq!(report.reembedded, 1);
    assert!(report.backup.is_none());
}

// ─────────────────────────────────────────────────────────────────────────────
// Chain Fallback
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_add_falls_back_when_provider_fails() {
    let provider = CountingProvider::new("down", 8, 0);
    let store = MemoryStore::open_in_memory(chain_of(provider.clone(), 8)).unwrap();

    let entry = store.add_memory("still remembered", ["x"]).await.unwrap();
    assert_eq!(entry.embedding_model, "char_fallback");
    assert_eq!(provider.calls(), 1);
    assert_eq!(store.stats().await.unwrap().model_used, "char_fallback");
}

#[tokio::test]
async fn test_remote_service_and_fallback() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embeddings": [[0.0, 3.0, 4.0, 0.0]]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/embed"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let remote = RemoteEmbedder::new(RemoteEmbedderConfig::new(
        format!("{}/embed", server.uri()),
        "embed_service",
    ))
    .unwrap();
    let embedder = Arc::new(Embedder::new(
        vec![Arc::new(remote) as SharedProvider],
        CharFallbackEmbedder::new(4),
    ));
    let store = MemoryStore::open_in_memory(embedder).unwrap();

    let first = store.add_memory("served remotely", ["a"]).await.unwrap();
    assert_eq!(first.embedding_model, "embed_service");
    assert!((first.embedding[1] - 0.6).abs() < 1e-6);
    assert!((first.embedding[2] - 0.8).abs() < 1e-6);

    let second = store.add_memory("served locally", ["b"]).await.unwrap();
    assert_eq!(second.embedding_model, "char_fallback");
    assert_eq!(second.dimensions(), 4);
    assert_eq!(store.len(), 2);
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
#[serial]
async fn test_open_from_environment_config() {
    let data = tempfile::tempdir().unwrap();
    let config_dir = tempfile::tempdir().unwrap();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "embeddings": [[1.0, 0.0]]
        })))
        .mount(&server)
        .await;

    // SAFETY: env mutation is serialized by #[serial]
    unsafe {
        std::env::set_var("MNEME_DATA_DIR", data.path());
        std::env::set_var("MNEME_EMBED_URL", format!("{}/embed", server.uri()));
    }
    let loaded =
        mneme_config::load_config_with_options(Some(config_dir.path()), Some(config_dir.path()));
    unsafe {
        std::env::remove_var("MNEME_DATA_DIR");
        std::env::remove_var("MNEME_EMBED_URL");
    }
    let config = loaded.unwrap().config;

    let store = MemoryStore::from_config(&config).unwrap();
    assert_eq!(
        store.config().database.as_deref(),
        Some(data.path().join("memories.sqlite").as_path())
    );

    let entry = store.add_memory("configured", ["env"]).await.unwrap();
    assert_eq!(entry.embedding_model, "embed_service");
    assert!(data.path().join("memories.sqlite").exists());
    assert!(data.path().join("memories.index").exists());
}
