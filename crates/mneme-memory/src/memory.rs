//! The memory store: records, mirror and index kept consistent under one lock.
//!
//! Write path: text → embedder → record store → mirror append → index add.
//! Read path: query → embedder → index search → hits resolved via the mirror.
//!
//! Structural changes (delete, replace, re-embed, compaction) reload the
//! mirror from the record store and rebuild the index before the lock is
//! released, so slot `i` of the index always refers to mirror entry `i`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mneme_config::MnemeConfig;
use mneme_embed::{EmbedderSpec, SharedEmbedder, build_embedder};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::error::{MemoryError, Result};
use crate::index::{IndexPolicy, SimilarityIndex, VectorIndex};
use crate::store::RecordStore;
use crate::summarize::{Summarizer, summarize_or_fallback};
use crate::types::{MemoryEntry, NewMemory, SearchHit, StoreStats};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime settings for a [`MemoryStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database file. `None` keeps everything in memory.
    pub database: Option<PathBuf>,
    /// How long SQLite waits on a locked database.
    pub busy_timeout: Duration,
    /// How long an operation waits for the store lock.
    pub lock_timeout: Duration,
    pub index: IndexPolicy,
    /// Default `k` for searches.
    pub search_limit: usize,
    /// Default limit for listings.
    pub list_limit: usize,
    /// Default re-embedding batch size.
    pub reembed_batch_size: usize,
    /// Default compaction threshold.
    pub compaction_max_entries: usize,
    /// Maximum length of fallback summaries, in characters.
    pub summary_char_budget: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database: None,
            busy_timeout: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(60),
            index: IndexPolicy::in_memory(),
            search_limit: 6,
            list_limit: 200,
            reembed_batch_size: 128,
            compaction_max_entries: 1000,
            summary_char_budget: 2000,
        }
    }
}

impl StoreConfig {
    /// Everything in memory, accelerated index, no artifact.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Database and index artifact under `dir` with default file names.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            database: Some(dir.join("memories.sqlite")),
            index: IndexPolicy {
                accelerated: true,
                artifact: Some(dir.join("memories.index")),
            },
            ..Self::default()
        }
    }

    /// Translate the `[memory]` config section.
    pub fn from_config(config: &MnemeConfig) -> Self {
        let memory = config.memory();
        Self {
            database: Some(memory.database_path()),
            busy_timeout: memory.busy_timeout(),
            lock_timeout: memory.lock_timeout(),
            index: IndexPolicy {
                accelerated: memory.accelerated_index,
                artifact: Some(memory.index_path()),
            },
            search_limit: memory.search_limit,
            list_limit: memory.list_limit,
            reembed_batch_size: memory.reembed_batch_size,
            compaction_max_entries: memory.compaction_max_entries,
            summary_char_budget: memory.summary_char_budget,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operation Results
// ─────────────────────────────────────────────────────────────────────────────

/// Progress of a re-embedding pass, reported after each batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReembedProgress {
    pub processed: usize,
    pub total: usize,
}

/// Callback for re-embedding progress.
pub type ProgressCallback = Box<dyn Fn(ReembedProgress) + Send + Sync>;

/// Result of [`MemoryStore::reembed_all`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReembedReport {
    pub reembedded: usize,
    pub total: usize,
    /// Provider that produced every new vector.
    pub model: String,
    /// Database copy taken before the pass, if one could be written.
    pub backup: Option<PathBuf>,
}

/// Result of [`MemoryStore::summarize_and_compact`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CompactionOutcome {
    /// The corpus was within bounds.
    NoAction { count: usize },
    /// The oldest entries were replaced by one summary.
    Compacted {
        removed: usize,
        new_count: usize,
        summary_id: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Store
// ─────────────────────────────────────────────────────────────────────────────

/// State guarded by the store lock.
struct StoreState {
    records: RecordStore,
    /// Corpus ordered by `created_at`, then `id`.
    mirror: Vec<Arc<MemoryEntry>>,
    index: VectorIndex,
}

impl StoreState {
    /// Corpus dimensionality, taken from the oldest entry with an embedding.
    fn dimension(&self) -> Option<usize> {
        first_dimension(&self.mirror)
    }
}

fn first_dimension(entries: &[Arc<MemoryEntry>]) -> Option<usize> {
    entries.iter().map(|e| e.dimensions()).find(|&d| d > 0)
}

/// Long-term semantic memory.
///
/// Share it behind an `Arc`. Mutations and searches serialize on one lock;
/// [`list_memories`](Self::list_memories) and [`len`](Self::len) read a
/// published snapshot and never wait.
pub struct MemoryStore {
    state: Mutex<StoreState>,
    snapshot: RwLock<Arc<Vec<Arc<MemoryEntry>>>>,
    embedder: SharedEmbedder,
    config: StoreConfig,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("database", &self.config.database)
            .field("count", &self.len())
            .field("model_used", &self.embedder.model_used())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Initialization
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Open the store, loading the corpus and its index.
    pub fn open(config: StoreConfig, embedder: SharedEmbedder) -> Result<Self> {
        let records = match config.database {
            Some(ref path) => RecordStore::open(path, config.busy_timeout)?,
            None => RecordStore::open_in_memory()?,
        };

        let mirror: Vec<Arc<MemoryEntry>> = records.scan()?.into_iter().map(Arc::new).collect();
        let index = VectorIndex::load_or_rebuild(&config.index, &vectors_of(&mirror));

        info!(
            count = mirror.len(),
            index = %index.kind(),
            "Memory store ready"
        );

        let snapshot = RwLock::new(Arc::new(mirror.clone()));
        Ok(Self {
            state: Mutex::new(StoreState {
                records,
                mirror,
                index,
            }),
            snapshot,
            embedder,
            config,
        })
    }

    /// In-memory store, mostly for tests.
    pub fn open_in_memory(embedder: SharedEmbedder) -> Result<Self> {
        Self::open(StoreConfig::in_memory(), embedder)
    }

    /// Build the embedder chain and open the store from application config.
    pub fn from_config(config: &MnemeConfig) -> Result<Self> {
        let spec = EmbedderSpec::from_config(&config.embedding());
        let embedder = Arc::new(build_embedder(&spec)?);
        Self::open(StoreConfig::from_config(config), embedder)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn embedder(&self) -> &SharedEmbedder {
        &self.embedder
    }

    async fn lock(&self) -> Result<MutexGuard<'_, StoreState>> {
        tokio::time::timeout(self.config.lock_timeout, self.state.lock())
            .await
            .map_err(|_| {
                MemoryError::Timeout(format!(
                    "store lock not acquired within {:?}",
                    self.config.lock_timeout
                ))
            })
    }

    fn publish(&self, state: &StoreState) {
        *self.snapshot.write() = Arc::new(state.mirror.clone());
    }

    /// Reload the mirror from the record store and rebuild the index.
    fn reload(&self, state: &mut StoreState) -> Result<()> {
        state.mirror = state.records.scan()?.into_iter().map(Arc::new).collect();
        self.rebuild_index(state);
        self.publish(state);
        debug!(count = state.mirror.len(), index = %state.index.kind(), "Mirror reloaded");
        Ok(())
    }

    /// Rebuild the index from the mirror. The old index is released first so
    /// its artifact connection does not outlive the rewrite.
    fn rebuild_index(&self, state: &mut StoreState) {
        drop(std::mem::take(&mut state.index));
        state.index = VectorIndex::rebuild(&self.config.index, &vectors_of(&state.mirror));
    }
}

fn vectors_of(mirror: &[Arc<MemoryEntry>]) -> Vec<&[f32]> {
    mirror.iter().map(|e| e.embedding.as_slice()).collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Add & Search
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Remember `text` with `tags`.
    pub async fn add_memory<I, S>(&self, text: impl Into<String>, tags: I) -> Result<MemoryEntry>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add(NewMemory::new(text).with_tags(tags)).await
    }

    /// Insert a memory, replacing any entry with the same explicit id.
    pub async fn add(&self, new: NewMemory) -> Result<MemoryEntry> {
        let (embedding, model) = self.embedder.embed_one(&new.text).await;
        let entry = new.into_entry(embedding, model);

        let mut state = self.lock().await?;

        if let Some(expected) = state.dimension()
            && expected != entry.dimensions()
        {
            return Err(MemoryError::DimensionMismatch {
                expected,
                actual: entry.dimensions(),
            });
        }

        state.records.upsert(&entry)?;

        let replaces = state.mirror.iter().any(|e| e.id == entry.id);
        let in_order = state
            .mirror
            .last()
            .is_none_or(|last| last.sort_key() <= entry.sort_key());

        if replaces || !in_order {
            self.reload(&mut state)?;
        } else {
            state.mirror.push(Arc::new(entry.clone()));
            if let Err(e) = state.index.add(&entry.embedding) {
                warn!(error = %e, "Incremental index add failed, rebuilding");
                self.rebuild_index(&mut state);
            }
            self.publish(&state);
        }

        info!(
            id = %entry.id,
            len = entry.text.len(),
            model = %entry.embedding_model,
            "memory_add"
        );
        Ok(entry)
    }

    /// The `k` most similar memories to `query`, best first.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchHit>> {
        if k == 0 || self.is_empty() {
            return Ok(Vec::new());
        }

        let (query_vector, _) = self.embedder.embed_one(query).await;

        let state = self.lock().await?;
        let Some(expected) = state.dimension() else {
            return Ok(Vec::new());
        };
        if expected != query_vector.len() {
            warn!(
                expected,
                actual = query_vector.len(),
                "Query dimension does not match the corpus, re-embed to search"
            );
            return Ok(Vec::new());
        }

        let hits: Vec<SearchHit> = state
            .index
            .search(&query_vector, k)?
            .into_iter()
            .filter_map(|s| state.mirror.get(s.slot).map(|e| SearchHit::from_entry(e, s.score)))
            .collect();

        debug!(k, hits = hits.len(), index = %state.index.kind(), "memory_search");
        Ok(hits)
    }

    /// Up to `limit` memories, newest first. Reads the published snapshot.
    pub fn list_memories(&self, limit: usize) -> Vec<MemoryEntry> {
        let snapshot = self.snapshot.read().clone();
        snapshot
            .iter()
            .rev()
            .take(limit)
            .map(|e| e.as_ref().clone())
            .collect()
    }

    /// Number of memories.
    pub fn len(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counts, index state and current provider.
    pub async fn stats(&self) -> Result<StoreStats> {
        let state = self.lock().await?;
        Ok(StoreStats {
            count: state.mirror.len(),
            dimensions: state.dimension(),
            index_kind: state.index.kind(),
            index_size: state.index.size(),
            model_used: self.embedder.model_used(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Deletion
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Delete a memory. Returns `false` if no such id exists.
    pub async fn delete_memory(&self, id: &str) -> Result<bool> {
        let mut state = self.lock().await?;

        if !state.records.delete(id)? {
            debug!(id, "Delete of unknown memory");
            return Ok(false);
        }

        self.reload(&mut state)?;
        info!(id, "memory_delete");
        Ok(true)
    }

    /// Delete memories whose text contains `substring` (case-insensitive),
    /// oldest first, at most `limit`. Returns the number removed.
    pub async fn delete_by_text(&self, substring: &str, limit: Option<usize>) -> Result<usize> {
        let mut state = self.lock().await?;

        let removed = state.records.delete_matching(substring, limit)?;
        if !removed.is_empty() {
            self.reload(&mut state)?;
        }

        info!(count = removed.len(), "memory_delete_batch");
        Ok(removed.len())
    }

    /// Delete everything. Returns the prior count.
    pub async fn delete_all(&self) -> Result<usize> {
        let mut state = self.lock().await?;

        let count = state.records.delete_all()?;
        state.mirror.clear();
        self.rebuild_index(&mut state);
        self.publish(&state);

        info!(count, "memory_delete_all");
        Ok(count)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Re-embedding
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Recompute every vector with the embedder's current backend.
    ///
    /// The first batch goes through the full chain; the provider that served
    /// it is then used alone for the rest, so the corpus never ends up mixing
    /// providers. A failure aborts the pass with earlier batches committed.
    pub async fn reembed_all(
        &self,
        batch_size: usize,
        progress: Option<&ProgressCallback>,
    ) -> Result<ReembedReport> {
        let batch_size = batch_size.max(1);
        let mut state = self.lock().await?;

        let total = state.mirror.len();
        if total == 0 {
            return Ok(ReembedReport {
                reembedded: 0,
                total: 0,
                model: self.embedder.model_used(),
                backup: None,
            });
        }

        let backup = self.backup(&state);
        let work: Vec<(String, String)> = state
            .mirror
            .iter()
            .map(|e| (e.id.clone(), e.text.clone()))
            .collect();

        // (provider, dimension) fixed by the first batch
        let mut pinned: Option<(String, usize)> = None;
        let mut processed = 0;

        for chunk in work.chunks(batch_size) {
            let texts: Vec<String> = chunk.iter().map(|(_, text)| text.clone()).collect();

            let embedded = match pinned {
                None => self.embedder.embed(&texts).await,
                Some((ref model, _)) => match self.embedder.embed_with(model, &texts).await {
                    Ok(embedded) => embedded,
                    Err(e) => {
                        return Err(self.abort_reembed(&mut state, processed, total, &e.to_string()));
                    }
                },
            };

            let dim = embedded.vectors.first().map(Vec::len).unwrap_or(0);
            match pinned {
                None => pinned = Some((embedded.model.clone(), dim)),
                Some((_, expected)) if expected != dim => {
                    let reason = format!("dimension changed from {} to {}", expected, dim);
                    return Err(self.abort_reembed(&mut state, processed, total, &reason));
                }
                Some(_) => {}
            }

            let updates: Vec<(String, Vec<f32>)> = chunk
                .iter()
                .map(|(id, _)| id.clone())
                .zip(embedded.vectors)
                .collect();
            if let Err(e) = state.records.update_embeddings(&updates, &embedded.model) {
                if let Err(reload_err) = self.reload(&mut state) {
                    warn!(error = %reload_err, "Failed to reload after re-embed error");
                }
                return Err(e);
            }

            processed += chunk.len();
            debug!(processed, total, "Re-embedded batch");
            if let Some(callback) = progress {
                callback(ReembedProgress { processed, total });
            }
        }

        self.reload(&mut state)?;

        let model = pinned
            .map(|(model, _)| model)
            .unwrap_or_else(|| self.embedder.model_used());
        info!(count = processed, model = %model, "memory_reembed");

        Ok(ReembedReport {
            reembedded: processed,
            total,
            model,
            backup,
        })
    }

    fn abort_reembed(
        &self,
        state: &mut StoreState,
        processed: usize,
        total: usize,
        reason: &str,
    ) -> MemoryError {
        warn!(processed, total, reason, "Re-embedding aborted");
        if let Err(e) = self.reload(state) {
            warn!(error = %e, "Failed to reload after aborted re-embed");
        }
        MemoryError::Embedding(format!(
            "re-embedding aborted after {} of {} entries: {}",
            processed, total, reason
        ))
    }

    /// Best-effort copy of the database next to it: `<db>.bak_<timestamp>`.
    fn backup(&self, state: &StoreState) -> Option<PathBuf> {
        let db = state.records.path()?;
        let mut name = db.as_os_str().to_owned();
        name.push(format!(".bak_{}", Utc::now().format("%Y%m%dT%H%M%SZ")));
        let target = PathBuf::from(name);

        match state.records.backup_to(&target) {
            Ok(()) => Some(target),
            Err(e) => {
                warn!(path = %target.display(), error = %e, "Backup before re-embed failed");
                None
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compaction
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryStore {
    /// Replace the oldest entries with one summary once the corpus exceeds
    /// `max_entries`.
    ///
    /// Removes `max(1, n - max_entries / 2)` entries, leaving
    /// `max_entries / 2 + 1`. The summary comes from `summarizer`, or from an
    /// extractive fallback when it is absent or fails.
    pub async fn summarize_and_compact(
        &self,
        max_entries: usize,
        summarizer: Option<&dyn Summarizer>,
    ) -> Result<CompactionOutcome> {
        let mut state = self.lock().await?;

        let count = state.mirror.len();
        if count <= max_entries {
            debug!(count, max_entries, "Compaction not needed");
            return Ok(CompactionOutcome::NoAction { count });
        }

        let remove_count = (count - max_entries / 2).max(1);
        let oldest = &state.mirror[..remove_count];
        let ids: Vec<String> = oldest.iter().map(|e| e.id.clone()).collect();
        let texts: Vec<String> = oldest.iter().map(|e| e.text.clone()).collect();

        let summary_text =
            summarize_or_fallback(summarizer, &texts, self.config.summary_char_budget).await;
        let (embedding, model) = self.embedder.embed_one(&summary_text).await;

        // Dimension of the entries that stay
        if let Some(expected) = first_dimension(&state.mirror[remove_count..])
            && expected != embedding.len()
        {
            return Err(MemoryError::DimensionMismatch {
                expected,
                actual: embedding.len(),
            });
        }

        let summary = NewMemory::new(summary_text)
            .with_tags(["summary".to_string(), format!("compacted_from_{}", remove_count)])
            .into_entry(embedding, model);

        state.records.replace_with_summary(&ids, &summary)?;
        self.reload(&mut state)?;

        let new_count = state.mirror.len();
        info!(removed = remove_count, new_count, "memory_compact");

        Ok(CompactionOutcome::Compacted {
            removed: remove_count,
            new_count,
            summary_id: summary.id,
        })
    }
}
