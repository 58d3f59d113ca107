//! Core data types for memory entries and query results.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::index::IndexKind;

// ─────────────────────────────────────────────────────────────────────────────
// Memory Entry
// ─────────────────────────────────────────────────────────────────────────────

/// A stored text snippet with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique identifier.
    pub id: String,
    /// The remembered text.
    pub text: String,
    /// De-duplicated tags, in first-seen order.
    pub tags: Vec<String>,
    /// Insertion time. Orders the corpus (ties broken by id).
    pub created_at: DateTime<Utc>,
    /// Unit-norm embedding of `text`.
    pub embedding: Vec<f32>,
    /// Provider that produced `embedding`.
    pub embedding_model: String,
}

impl MemoryEntry {
    /// Embedding dimensionality.
    pub fn dimensions(&self) -> usize {
        self.embedding.len()
    }

    /// Check whether the entry carries a tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Corpus order: `created_at`, then `id`.
    pub fn sort_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// New Memory
// ─────────────────────────────────────────────────────────────────────────────

/// Input for [`MemoryStore::add`](crate::MemoryStore::add).
///
/// `id` and `created_at` are normally generated. Supplying them is meant for
/// imports and replays; an existing row with the same id is replaced.
#[derive(Debug, Clone, Default)]
pub struct NewMemory {
    pub text: String,
    pub tags: Vec<String>,
    pub id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl NewMemory {
    /// Create a new memory from text.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Replace all tags.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Use a caller-chosen id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Use a caller-chosen timestamp.
    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    /// Turn into a stored entry with the given embedding.
    pub(crate) fn into_entry(self, embedding: Vec<f32>, embedding_model: String) -> MemoryEntry {
        MemoryEntry {
            id: self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            text: self.text,
            tags: dedup_tags(self.tags),
            // Stored with microsecond precision
            created_at: self.created_at.unwrap_or_else(Utc::now).trunc_subsecs(6),
            embedding,
            embedding_model,
        }
    }
}

/// Remove duplicate tags, keeping the first occurrence of each.
pub fn dedup_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.into();
        if !out.contains(&tag) {
            out.push(tag);
        }
    }
    out
}

// ─────────────────────────────────────────────────────────────────────────────
// Query Results
// ─────────────────────────────────────────────────────────────────────────────

/// A search result, best first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    /// Cosine similarity with the query, in [-1, 1].
    pub score: f32,
}

impl SearchHit {
    pub(crate) fn from_entry(entry: &MemoryEntry, score: f32) -> Self {
        Self {
            id: entry.id.clone(),
            text: entry.text.clone(),
            tags: entry.tags.clone(),
            created_at: entry.created_at,
            score,
        }
    }
}

/// Snapshot of store health.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStats {
    /// Number of live entries.
    pub count: usize,
    /// Corpus dimensionality, if any entry exists.
    pub dimensions: Option<usize>,
    /// Which index variant serves searches.
    pub index_kind: IndexKind,
    /// Rows in the index. Equals `count` after every operation.
    pub index_size: usize,
    /// Provider that served the most recent embedding call.
    pub model_used: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_tags_keeps_first_occurrence() {
        let tags = dedup_tags(["b", "a", "b", "c", "a"]);
        assert_eq!(tags, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_new_memory_builder() {
        let new = NewMemory::new("hello")
            .with_tag("chat")
            .with_tag("chat")
            .with_id("fixed");
        let entry = new.into_entry(vec![1.0], "m".to_string());
        assert_eq!(entry.id, "fixed");
        assert_eq!(entry.tags, vec!["chat"]);
        assert_eq!(entry.dimensions(), 1);
        assert!(entry.has_tag("chat"));
        assert!(!entry.has_tag("other"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let a = NewMemory::new("x").into_entry(vec![1.0], "m".to_string());
        let b = NewMemory::new("x").into_entry(vec![1.0], "m".to_string());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_created_at_truncated_to_micros() {
        let entry = NewMemory::new("x").into_entry(vec![1.0], "m".to_string());
        assert_eq!(entry.created_at.timestamp_subsec_nanos() % 1_000, 0);
    }

    #[test]
    fn test_entry_serde_roundtrip() {
        let entry = NewMemory::new("text")
            .with_tags(["a", "b"])
            .into_entry(vec![0.6, 0.8], "char_fallback".to_string());
        let json = serde_json::to_string(&entry).unwrap();
        let back: MemoryEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
