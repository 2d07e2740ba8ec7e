//! Embedding provider trait and vector utilities.
//!
//! Defines the [`EmbeddingProvider`] contract that every embedding backend
//! implements, the [`ProviderError`] it reports, plus pure helpers for
//! vector serialization and similarity.
//!
//! Concrete providers (Ollama, OpenAI, fastembed, hashing) live in the
//! `kb-harness` app crate.

use async_trait::async_trait;
use thiserror::Error;

/// Failure reported by an embedding backend.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("embedding API error {status}: {body}")]
    Api { status: u16, body: String },
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
    #[error("embedding count mismatch: sent {expected} texts, got {actual} vectors")]
    CountMismatch { expected: usize, actual: usize },
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),
}

/// Text-to-vector backend.
///
/// `embed_batch` must preserve input order: vector `i` embeds text `i`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality, or `0` if unknown.
    fn dims(&self) -> usize;

    /// Embed a batch of texts in one logical call.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        match vectors.len() {
            1 => Ok(vectors.remove(0)),
            n => Err(ProviderError::CountMismatch {
                expected: 1,
                actual: n,
            }),
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use kb_harness_core::embedding::{vec_to_blob, blob_to_vec};
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

/// Decode a BLOB back into a float vector. Trailing partial words are ignored.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors
/// of different lengths, or zero-magnitude vectors.
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

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<Vec<f32>>);

    #[async_trait]
    impl EmbeddingProvider for Fixed {
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn embed_defaults_to_single_batch() {
        let p = Fixed(vec![vec![1.0, 0.0]]);
        assert_eq!(p.embed("x").await.unwrap(), vec![1.0, 0.0]);
    }

    #[tokio::test]
    async fn embed_rejects_wrong_count() {
        let p = Fixed(vec![]);
        let err = p.embed("x").await.unwrap_err();
        assert!(matches!(err, ProviderError::CountMismatch { expected: 1, actual: 0 }));
    }

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
