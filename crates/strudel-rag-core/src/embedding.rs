//! Embedding capability and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! plus pure helpers for vector serialization and similarity computation.
//!
//! Concrete providers (OpenAI, Ollama, the deterministic hash embedder)
//! live in the `strudel-rag` app crate.

use anyhow::{anyhow, Result};
use async_trait::async_trait;

/// A text → vector embedding backend.
///
/// The dimensionality is fixed for the lifetime of a corpus; queries must be
/// embedded with the same model that embedded the stored records.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Empty embedding response"))
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use strudel_rag_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector. Trailing bytes that do not form
/// a whole `f32` are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or
/// zero-magnitude vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    (dot / denom).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_embed_delegates_to_batch() {
        let v = FixedEmbedder.embed("abc").await.unwrap();
        assert_eq!(v, vec![3.0, 1.0]);
    }

    #[test]
    fn test_blob_ignores_partial_trailing_bytes() {
        let mut blob = vec_to_blob(&[1.5f32]);
        blob.push(0xff);
        assert_eq!(blob_to_vec(&blob), vec![1.5]);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_opposite() {
        let sim = cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]);
        assert!((sim + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
