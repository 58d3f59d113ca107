//! Linear-scan index.

use mneme_embed::dot;

use crate::error::Result;

use super::{ScoredSlot, SimilarityIndex, rank};

/// Scores the query against every row.
///
/// Rows of any dimension are accepted; rows whose dimension differs from the
/// query (including empty rows) are skipped at search time.
#[derive(Debug, Clone, Default)]
pub struct BruteForceIndex {
    rows: Vec<Vec<f32>>,
}

impl BruteForceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from rows in order.
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        Self {
            rows: rows.into_iter().map(<[f32]>::to_vec).collect(),
        }
    }
}

impl SimilarityIndex for BruteForceIndex {
    fn add(&mut self, vector: &[f32]) -> Result<()> {
        self.rows.push(vector.to_vec());
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredSlot>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<ScoredSlot> = self
            .rows
            .iter()
            .enumerate()
            .filter_map(|(slot, row)| dot(row, query).map(|score| ScoredSlot { slot, score }))
            .collect();

        scored.sort_by(rank);
        scored.truncate(k);
        Ok(scored)
    }

    fn size(&self) -> usize {
        self.rows.iter().filter(|r| !r.is_empty()).count()
    }

    fn dimensions(&self) -> Option<usize> {
        self.rows.iter().map(Vec::len).find(|&d| d > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_ranks_and_truncates() {
        let index = BruteForceIndex::from_rows([&[1.0, 0.0][..], &[0.0, 1.0], &[0.6, 0.8]]);
        let hits = index.search(&[0.0, 1.0], 2).unwrap();
        let slots: Vec<usize> = hits.iter().map(|h| h.slot).collect();
        assert_eq!(slots, vec![1, 2]);
        assert!(index.search(&[0.0, 1.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_stable_ties() {
        let mut index = BruteForceIndex::new();
        for _ in 0..4 {
            index.add(&[1.0, 0.0]).unwrap();
        }
        let slots: Vec<usize> = index.search(&[1.0, 0.0], 3).unwrap().iter().map(|h| h.slot).collect();
        assert_eq!(slots, vec![0, 1, 2]);
    }

    #[test]
    fn test_mixed_dimensions_skipped() {
        let index = BruteForceIndex::from_rows([&[1.0, 0.0][..], &[1.0, 0.0, 0.0], &[0.0, 1.0]]);
        assert_eq!(index.size(), 3);
        let slots: Vec<usize> = index.search(&[1.0, 0.0], 5).unwrap().iter().map(|h| h.slot).collect();
        assert_eq!(slots, vec![0, 2]);
    }
}
