//! Long-term semantic memory for mneme.
//!
//! Text snippets are embedded, stored durably in SQLite and recalled by
//! cosine similarity. The store keeps three views of the corpus consistent
//! under one lock: the record store (authoritative), an in-memory mirror
//! ordered by insertion time, and a similarity index over the mirror.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  MemoryStore                                                            │
//! │  - add / search / list / delete / reembed / compact                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//!          │                     │                         │
//!          ▼                     ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────────────────┐
//! │  Embedder chain │   │  RecordStore    │   │  VectorIndex                │
//! │  (mneme-embed)  │   │  SQLite + WAL   │   │  sqlite-vec or brute force  │
//! └─────────────────┘   └─────────────────┘   │  + on-disk artifact         │
//!                                             └─────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use mneme_embed::Embedder;
//! use mneme_memory::{MemoryStore, StoreConfig};
//!
//! # async fn run() -> mneme_memory::Result<()> {
//! let embedder = Arc::new(Embedder::fallback_only(384));
//! let store = MemoryStore::open(StoreConfig::in_dir("/tmp/mneme"), embedder)?;
//!
//! store.add_memory("cats are great", ["pets"]).await?;
//! for hit in store.search("cats", 3).await? {
//!     println!("{:.3} {}", hit.score, hit.text);
//! }
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod error;
pub mod index;
pub mod memory;
pub mod store;
pub mod summarize;
pub mod types;

pub use error::{MemoryError, Result};
pub use index::{
    BruteForceIndex, IndexKind, IndexPolicy, ScoredSlot, SimilarityIndex, Vec0Index, VectorIndex,
};
pub use memory::{
    CompactionOutcome, MemoryStore, ProgressCallback, ReembedProgress, ReembedReport, StoreConfig,
};
pub use store::RecordStore;
pub use summarize::{FnSummarizer, SummarizeError, Summarizer, first_sentences, leading_excerpts};
pub use types::{MemoryEntry, NewMemory, SearchHit, StoreStats, dedup_tags};
