//! Bounded in-memory vector store with FIFO eviction.

use searchai_core::{Error, Result, SimilarityResult};
use std::collections::VecDeque;

/// `(a·b) / (|a||b|)`, or 0 when either vector has zero magnitude.
///
/// Vectors of different lengths are compared over their common prefix; callers check dimensions.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    (dot / (na.sqrt() * nb.sqrt())).clamp(-1.0, 1.0)
}

#[derive(Debug, Clone)]
struct Entry {
    id: usize,
    ingest: u64,
    vector: Vec<f32>,
    text: String,
}

/// Insertion-ordered `(id, vector)` pairs with a hard capacity.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dimension: usize,
    capacity: usize,
    entries: VecDeque<Entry>,
}

impl VectorStore {
    pub fn new(dimension: usize, capacity: usize) -> Self {
        Self {
            dimension,
            capacity: capacity.max(1),
            entries: VecDeque::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn check_dimension(&self, v: &[f32]) -> Result<()> {
        if v.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: v.len(),
            });
        }
        Ok(())
    }

    /// Append one entry, evicting the oldest first when full.
    pub fn insert(&mut self, id: usize, ingest: u64, vector: Vec<f32>, text: String) -> Result<()> {
        self.check_dimension(&vector)?;
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(Entry {
            id,
            ingest,
            vector,
            text,
        });
        Ok(())
    }

    /// Identifiers in insertion order.
    pub fn ids(&self) -> Vec<usize> {
        self.entries.iter().map(|e| e.id).collect()
    }

    /// The `min(k, len)` entries most similar to `query`, best first.
    pub fn rank(&self, query: &[f32], k: usize) -> Result<Vec<SimilarityResult>> {
        self.check_dimension(query)?;
        let mut scored: Vec<SimilarityResult> = self
            .entries
            .iter()
            .map(|e| SimilarityResult {
                id: e.id,
                ingest: e.ingest,
                score: cosine(query, &e.vector),
                text: e.text.clone(),
            })
            .collect();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k.min(self.entries.len()));
        Ok(scored)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn fifo_eviction_keeps_newest() {
        let mut s = VectorStore::new(2, 3);
        for id in 0..4 {
            s.insert(id, 1, vec![1.0, id as f32], format!("c{id}")).unwrap();
        }
        assert_eq!(s.len(), 3);
        assert_eq!(s.ids(), vec![1, 2, 3]);
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let mut s = VectorStore::new(3, 10);
        let err = s.insert(0, 1, vec![1.0, 2.0], String::new()).unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert!(s.is_empty());
        assert!(s.rank(&[1.0], 1).is_err());
    }

    #[test]
    fn rank_sorts_descending_and_truncates() {
        let mut s = VectorStore::new(2, 10);
        s.insert(0, 1, vec![1.0, 0.0], "east".into()).unwrap();
        s.insert(1, 1, vec![0.0, 1.0], "north".into()).unwrap();
        s.insert(2, 1, vec![1.0, 1.0], "north-east".into()).unwrap();
        let r = s.rank(&[1.0, 0.1], 2).unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r[0].id, 0);
        assert_eq!(r[1].id, 2);
        assert!(r[0].score >= r[1].score);

        assert_eq!(s.rank(&[1.0, 0.0], 50).unwrap().len(), 3);
    }

    #[test]
    fn zero_vectors_score_zero() {
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
    }

    proptest! {
        #[test]
        fn cosine_is_symmetric_and_bounded(
            a in proptest::collection::vec(-100.0f32..100.0, 8),
            b in proptest::collection::vec(-100.0f32..100.0, 8),
        ) {
            let ab = cosine(&a, &b);
            let ba = cosine(&b, &a);
            prop_assert!((ab - ba).abs() < 1e-6);
            prop_assert!((-1.0..=1.0).contains(&ab));
        }

        #[test]
        fn cosine_with_self_is_one(a in proptest::collection::vec(-100.0f32..100.0, 8)) {
            prop_assume!(a.iter().any(|x| x.abs() > 1e-3));
            prop_assert!((cosine(&a, &a) - 1.0).abs() < 1e-4);
        }

        #[test]
        fn never_exceeds_capacity(cap in 1usize..20, n in 0usize..60) {
            let mut s = VectorStore::new(1, cap);
            for id in 0..n {
                s.insert(id, 1, vec![1.0], String::new()).unwrap();
                prop_assert!(s.len() <= cap);
            }
            let expected: Vec<usize> = (n.saturating_sub(cap)..n).collect();
            prop_assert_eq!(s.ids(), expected);
        }
    }
}
