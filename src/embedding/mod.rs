//! The embedding model is an external collaborator, abstracted as a
//! vectorizer (spec.md §1, §6): `embed`/`embed_batch` over a fixed
//! dimension, failures surface as errors rather than silent zero-vectors.

use async_trait::async_trait;

use crate::error::CoreResult;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// The fixed dimension every vector this embedder produces has. The
    /// retrieval store treats this as a store-wide constant (spec.md §3
    /// TrainingRecord invariant).
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>>;

    /// Default implementation embeds sequentially; providers with a real
    /// batch endpoint should override this.
    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Deterministic, dependency-free fallback embedder for development and
/// tests: hashes overlapping word shingles into a fixed-width vector and
/// L2-normalises it. This is not semantically meaningful beyond crude
/// lexical overlap, but it is stable, has no network dependency, and lets
/// the retrieval store's novelty/diversity/quality filters be exercised
/// deterministically — the same "local fallback when no adapter is
/// injected" pattern spec.md §4.4 prescribes for the executor.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        let mut vector = vec![0f32; self.dimension];
        let lowercase = text.to_lowercase();
        for token in lowercase.split_whitespace() {
            let hash = fnv1a(token.as_bytes());
            let idx = (hash as usize) % self.dimension;
            vector[idx] += 1.0;
            // Mix in a second hash so single-token collisions spread out.
            let idx2 = ((hash >> 32) as usize) % self.dimension;
            vector[idx2] += 0.5;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embeddings_have_configured_dimension() {
        let embedder = HashingEmbedder::new(64);
        let v = embedder.embed("how many users are there").await.unwrap();
        assert_eq!(v.len(), 64);
        assert_eq!(embedder.dimension(), 64);
    }

    #[tokio::test]
    async fn identical_text_yields_identical_vectors() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("average sat score by city").await.unwrap();
        let b = embedder.embed("average sat score by city").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn unrelated_text_is_not_identical() {
        let embedder = HashingEmbedder::default();
        let a = embedder.embed("average sat score by city").await.unwrap();
        let b = embedder.embed("drop all tables immediately").await.unwrap();
        assert_ne!(a, b);
    }
}
