//! Offline embeddings by feature hashing.
//!
//! Not semantic in any deep sense: texts sharing words get similar vectors. Enough to exercise
//! retrieval without network calls, and deterministic across runs and platforms.

use searchai_core::{Embedder, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

fn tokenize(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for ch in s.chars() {
        if ch.is_alphanumeric() {
            cur.extend(ch.to_lowercase());
        } else if !cur.is_empty() {
            if cur.chars().count() >= 2 {
                out.push(std::mem::take(&mut cur));
            } else {
                cur.clear();
            }
        }
    }
    if cur.chars().count() >= 2 {
        out.push(cur);
    }
    out
}

/// Bucket and sign for one token.
fn slot(token: &str, dimension: usize) -> (usize, f32) {
    let digest = Sha256::digest(token.as_bytes());
    let mut b = [0u8; 8];
    b.copy_from_slice(&digest[..8]);
    let h = u64::from_le_bytes(b);
    let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
    ((h % dimension as u64) as usize, sign)
}

#[derive(Debug, Clone)]
pub struct LexicalEmbedder {
    dimension: usize,
}

impl LexicalEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Unit-length vector (all zeros for text without tokens).
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut tf: HashMap<String, u32> = HashMap::new();
        for t in tokenize(text) {
            *tf.entry(t).or_insert(0) += 1;
        }
        let mut v = vec![0.0f32; self.dimension];
        for (tok, n) in &tf {
            let (i, sign) = slot(tok, self.dimension);
            // Sublinear term frequency.
            v[i] += sign * (1.0 + (*n as f32).ln());
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait::async_trait]
impl Embedder for LexicalEmbedder {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::cosine;

    #[test]
    fn tokenize_lowercases_and_drops_single_chars() {
        assert_eq!(
            tokenize("Rust's Tokio, a runtime!"),
            vec!["rust", "tokio", "runtime"]
        );
    }

    #[test]
    fn vectors_are_unit_length_with_fixed_dimension() {
        let e = LexicalEmbedder::new(64);
        let v = e.vector("hello world hello");
        assert_eq!(v.len(), 64);
        let n: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((n - 1.0).abs() < 1e-5);
        assert!(e.vector("  !! ").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn shared_vocabulary_scores_higher() {
        let e = LexicalEmbedder::new(1536);
        let q = e.embed("volcano eruption iceland").await.unwrap();
        let near = e
            .embed("The volcano eruption in Iceland closed airports.")
            .await
            .unwrap();
        let far = e
            .embed("Quarterly earnings beat analyst expectations.")
            .await
            .unwrap();
        assert!(cosine(&q, &near) > cosine(&q, &far));
        assert_eq!(e.vector("same text"), e.vector("same text"));
    }
}
