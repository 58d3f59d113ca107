//! Similarity indexes over the in-memory mirror.
//!
//! Slot `i` of an index corresponds to mirror entry `i` as of the last
//! (re)build. The index is never authoritative: the record store is, and the
//! on-disk artifact is only a restart cache.
//!
//! ```text
//! load_or_rebuild(policy, vectors)
//!   ├─ accelerated off           ─► BruteForce
//!   ├─ mixed dimensions          ─► BruteForce
//!   ├─ artifact rows/dim match   ─► Accelerated (loaded)
//!   └─ otherwise                 ─► Accelerated (rebuilt, artifact rewritten)
//! ```

mod brute;
mod vec0;

use std::cmp::Ordering;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::Result;

pub use brute::BruteForceIndex;
pub use vec0::Vec0Index;

// ─────────────────────────────────────────────────────────────────────────────
// Index Trait
// ─────────────────────────────────────────────────────────────────────────────

/// A ranked search result: mirror position and similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredSlot {
    pub slot: usize,
    pub score: f32,
}

/// Shared interface of the index variants.
///
/// Results are ordered by score descending, ties by slot ascending.
pub trait SimilarityIndex {
    /// Append a row at the next slot. An empty vector occupies the slot
    /// without being searchable.
    fn add(&mut self, vector: &[f32]) -> Result<()>;

    /// Up to `k` best rows for `query`.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredSlot>>;

    /// Number of searchable rows.
    fn size(&self) -> usize;

    /// Row dimension, if known.
    fn dimensions(&self) -> Option<usize>;
}

/// Score descending, then slot ascending.
pub(crate) fn rank(a: &ScoredSlot, b: &ScoredSlot) -> Ordering {
    b.score.total_cmp(&a.score).then(a.slot.cmp(&b.slot))
}

// ─────────────────────────────────────────────────────────────────────────────
// Policy
// ─────────────────────────────────────────────────────────────────────────────

/// How indexes are built and cached.
#[derive(Debug, Clone, Default)]
pub struct IndexPolicy {
    /// Use the sqlite-vec index when the corpus allows it.
    pub accelerated: bool,
    /// SQLite file holding the accelerated index. `None` keeps it in memory.
    pub artifact: Option<PathBuf>,
}

impl IndexPolicy {
    /// Accelerated index without an artifact.
    pub fn in_memory() -> Self {
        Self {
            accelerated: true,
            artifact: None,
        }
    }
}

/// Which variant serves searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    Accelerated,
    BruteForce,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accelerated => "accelerated",
            Self::BruteForce => "brute_force",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vector Index
// ─────────────────────────────────────────────────────────────────────────────

/// The index variant chosen at construction or rebuild time.
#[derive(Debug)]
pub enum VectorIndex {
    Accelerated(Vec0Index),
    BruteForce(BruteForceIndex),
}

impl Default for VectorIndex {
    fn default() -> Self {
        Self::BruteForce(BruteForceIndex::new())
    }
}

/// Dimensional shape of a corpus. Rows without an embedding are ignored.
enum Shape {
    Empty,
    Uniform(usize),
    Mixed,
}

fn shape_of(vectors: &[&[f32]]) -> Shape {
    let mut dims = vectors.iter().map(|v| v.len()).filter(|&d| d > 0);
    let Some(dim) = dims.next() else {
        return Shape::Empty;
    };
    if dims.all(|d| d == dim) {
        Shape::Uniform(dim)
    } else {
        Shape::Mixed
    }
}

fn searchable_rows(vectors: &[&[f32]]) -> usize {
    vectors.iter().filter(|v| !v.is_empty()).count()
}

impl VectorIndex {
    /// The variant serving searches.
    pub fn kind(&self) -> IndexKind {
        match self {
            Self::Accelerated(_) => IndexKind::Accelerated,
            Self::BruteForce(_) => IndexKind::BruteForce,
        }
    }

    /// Open-time construction: reuse the artifact when it matches the corpus.
    ///
    /// The artifact is accepted only if it opens as a valid index, holds one
    /// row per embedded entry and has the corpus dimension. Anything else is
    /// rebuilt from `vectors`.
    pub fn load_or_rebuild(policy: &IndexPolicy, vectors: &[&[f32]]) -> Self {
        if policy.accelerated
            && let Shape::Uniform(dim) = shape_of(vectors)
            && let Some(ref path) = policy.artifact
            && path.exists()
        {
            match Vec0Index::load(path, vectors.len()) {
                Ok(index)
                    if index.size() == searchable_rows(vectors)
                        && index.dimensions() == Some(dim) =>
                {
                    info!(path = %path.display(), rows = index.size(), "Loaded index artifact");
                    return Self::Accelerated(index);
                }
                Ok(index) => {
                    info!(
                        artifact_rows = index.size(),
                        corpus_rows = searchable_rows(vectors),
                        "Index artifact is stale, rebuilding"
                    );
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Index artifact unreadable, rebuilding");
                }
            }
        }

        Self::rebuild(policy, vectors)
    }

    /// Build from `vectors` in order, rewriting the artifact.
    ///
    /// Falls back to brute force when acceleration is off, the corpus holds
    /// mixed dimensions or sqlite-vec is unusable. An empty corpus removes
    /// the artifact. An unwritable artifact keeps the index in memory.
    pub fn rebuild(policy: &IndexPolicy, vectors: &[&[f32]]) -> Self {
        if !policy.accelerated {
            return Self::BruteForce(BruteForceIndex::from_rows(vectors.iter().copied()));
        }

        let index = match shape_of(vectors) {
            Shape::Empty => {
                remove_artifact(policy);
                Vec0Index::pending(policy.artifact.clone(), vectors.len())
            }
            Shape::Mixed => {
                warn!(
                    rows = vectors.len(),
                    "Corpus holds mixed embedding dimensions, using brute-force search"
                );
                remove_artifact(policy);
                return Self::BruteForce(BruteForceIndex::from_rows(vectors.iter().copied()));
            }
            Shape::Uniform(dim) => match build_accelerated(policy, dim, vectors) {
                Some(index) => index,
                None => return Self::BruteForce(BruteForceIndex::from_rows(vectors.iter().copied())),
            },
        };

        debug!(rows = index.size(), "Accelerated index rebuilt");
        Self::Accelerated(index)
    }
}

fn build_accelerated(policy: &IndexPolicy, dim: usize, vectors: &[&[f32]]) -> Option<Vec0Index> {
    let artifact_error = match Vec0Index::build(policy.artifact.clone(), dim, vectors) {
        Ok(index) => return Some(index),
        Err(e) => e,
    };

    if let Some(ref path) = policy.artifact {
        warn!(path = %path.display(), error = %artifact_error, "Failed to write index artifact, indexing in memory");
        match Vec0Index::build(None, dim, vectors) {
            Ok(index) => return Some(index),
            Err(e) => warn!(error = %e, "Failed to build accelerated index, using brute-force search"),
        }
    } else {
        warn!(error = %artifact_error, "Failed to build accelerated index, using brute-force search");
    }
    None
}

fn remove_artifact(policy: &IndexPolicy) {
    if let Some(ref path) = policy.artifact {
        match std::fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "Removed index artifact"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove index artifact"),
        }
    }
}

impl SimilarityIndex for VectorIndex {
    fn add(&mut self, vector: &[f32]) -> Result<()> {
        match self {
            Self::Accelerated(index) => index.add(vector),
            Self::BruteForce(index) => index.add(vector),
        }
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredSlot>> {
        match self {
            Self::Accelerated(index) => index.search(query, k),
            Self::BruteForce(index) => index.search(query, k),
        }
    }

    fn size(&self) -> usize {
        match self {
            Self::Accelerated(index) => index.size(),
            Self::BruteForce(index) => index.size(),
        }
    }

    fn dimensions(&self) -> Option<usize> {
        match self {
            Self::Accelerated(index) => index.dimensions(),
            Self::BruteForce(index) => index.dimensions(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy_at(dir: &TempDir) -> IndexPolicy {
        IndexPolicy {
            accelerated: true,
            artifact: Some(dir.path().join("memories.index")),
        }
    }

    const A: &[f32] = &[1.0, 0.0];
    const B: &[f32] = &[0.0, 1.0];
    const C: &[f32] = &[0.6, 0.8];

    #[test]
    fn test_rebuild_writes_artifact() {
        let dir = TempDir::new().unwrap();
        let policy = policy_at(&dir);
        let index = VectorIndex::rebuild(&policy, &[A, B]);
        assert_eq!(index.kind(), IndexKind::Accelerated);
        assert_eq!(index.size(), 2);
        assert!(policy.artifact.as_ref().unwrap().exists());
    }

    #[test]
    fn test_load_reuses_matching_artifact() {
        let dir = TempDir::new().unwrap();
        let policy = policy_at(&dir);
        drop(VectorIndex::rebuild(&policy, &[A, B]));

        // Same count and dimension: the artifact wins even over different rows
        let index = VectorIndex::load_or_rebuild(&policy, &[C, C]);
        let hits = index.search(A, 1).unwrap();
        assert_eq!(hits[0].slot, 0);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_rebuilds_on_count_mismatch() {
        let dir = TempDir::new().unwrap();
        let policy = policy_at(&dir);
        drop(VectorIndex::rebuild(&policy, &[A, B]));

        let index = VectorIndex::load_or_rebuild(&policy, &[A, B, C]);
        assert_eq!(index.size(), 3);
        drop(index);
        let reloaded = Vec0Index::load(policy.artifact.as_ref().unwrap(), 3).unwrap();
        assert_eq!(reloaded.size(), 3);
    }

    #[test]
    fn test_load_rebuilds_on_corrupt_artifact() {
        let dir = TempDir::new().unwrap();
        let policy = policy_at(&dir);
        std::fs::write(policy.artifact.as_ref().unwrap(), b"garbage").unwrap();

        let index = VectorIndex::load_or_rebuild(&policy, &[A]);
        assert_eq!(index.kind(), IndexKind::Accelerated);
        assert_eq!(index.size(), 1);
    }

    #[test]
    fn test_mixed_dimensions_use_brute_force() {
        let dir = TempDir::new().unwrap();
        let policy = policy_at(&dir);
        let index = VectorIndex::load_or_rebuild(&policy, &[A, &[1.0, 0.0, 0.0]]);
        assert_eq!(index.kind(), IndexKind::BruteForce);
        assert_eq!(index.size(), 2);
    }

    #[test]
    fn test_rows_without_embedding_are_skipped() {
        let dir = TempDir::new().unwrap();
        let policy = policy_at(&dir);
        let index = VectorIndex::load_or_rebuild(&policy, &[&[], A, B]);
        assert_eq!(index.kind(), IndexKind::Accelerated);
        assert_eq!(index.size(), 2);
        assert_eq!(index.dimensions(), Some(2));
        assert_eq!(index.search(B, 1).unwrap()[0].slot, 2);
        drop(index);

        // The same corpus reuses the artifact on reopen
        let reopened = VectorIndex::load_or_rebuild(&policy, &[&[], A, B]);
        assert_eq!(reopened.size(), 2);
    }

    #[test]
    fn test_only_empty_rows_gives_pending_index() {
        let mut index = VectorIndex::rebuild(&IndexPolicy::in_memory(), &[&[]]);
        assert_eq!(index.kind(), IndexKind::Accelerated);
        assert_eq!(index.size(), 0);

        index.add(C).unwrap();
        assert_eq!(index.search(C, 1).unwrap()[0].slot, 1);
    }

    #[test]
    fn test_disabled_acceleration() {
        let policy = IndexPolicy::default();
        let index = VectorIndex::load_or_rebuild(&policy, &[A, B]);
        assert_eq!(index.kind(), IndexKind::BruteForce);
    }

    #[test]
    fn test_empty_corpus_removes_artifact() {
        let dir = TempDir::new().unwrap();
        let policy = policy_at(&dir);
        drop(VectorIndex::rebuild(&policy, &[A]));
        assert!(policy.artifact.as_ref().unwrap().exists());

        let index = VectorIndex::rebuild(&policy, &[]);
        assert_eq!(index.size(), 0);
        assert!(!policy.artifact.as_ref().unwrap().exists());
    }

    #[test]
    fn test_unwritable_artifact_does_not_fail() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be
        let path = dir.path().join("memories.index");
        std::fs::create_dir(&path).unwrap();
        let policy = IndexPolicy {
            accelerated: true,
            artifact: Some(path),
        };
        let index = VectorIndex::rebuild(&policy, &[A, B]);
        assert_eq!(index.kind(), IndexKind::Accelerated);
        assert_eq!(index.size(), 2);
    }

    #[test]
    fn test_variants_agree() {
        let rows = [A, B, C];
        let accelerated = VectorIndex::rebuild(&IndexPolicy::in_memory(), &rows);
        let brute = VectorIndex::rebuild(&IndexPolicy::default(), &rows);
        assert_eq!(accelerated.kind(), IndexKind::Accelerated);
        assert_eq!(accelerated.search(C, 3).unwrap(), brute.search(C, 3).unwrap());
    }

    #[test]
    fn test_index_kind_display() {
        assert_eq!(IndexKind::Accelerated.to_string(), "accelerated");
        assert_eq!(IndexKind::BruteForce.to_string(), "brute_force");
    }
}
