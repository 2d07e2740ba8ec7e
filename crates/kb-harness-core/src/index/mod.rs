//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait is the only contract the ingestion pipeline and
//! the retrieval engine rely on: batch insert, nearest-neighbour search with
//! a minimum score, and point deletes. No native metadata filtering is
//! assumed; collection scoping happens in [`crate::retrieval`].
//!
//! Implementations must be `Send + Sync` and must tolerate concurrent
//! searches while a write is in flight.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// Text and string metadata stored next to each vector.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Payload {
    pub text: String,
    pub metadata: BTreeMap<String, String>,
}

impl Payload {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexMatch {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Failure reported by a vector index backend.
#[derive(Debug, Clone, Error)]
pub enum IndexError {
    #[error("batch length mismatch: {ids} ids, {vectors} vectors, {payloads} payloads")]
    LengthMismatch {
        ids: usize,
        vectors: usize,
        payloads: usize,
    },
    #[error("vector dimension mismatch: index holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("vector index write failed: {0}")]
    Write(String),
    #[error("vector index read failed: {0}")]
    Read(String),
}

/// Abstract nearest-neighbour store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`add_all`](VectorIndex::add_all) | Insert a batch atomically |
/// | [`search`](VectorIndex::search) | Top matches above `min_score`, best first |
/// | [`remove`](VectorIndex::remove) | Delete entries by id |
/// | [`len`](VectorIndex::len) | Number of stored entries |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert `(id, vector, payload)` triples. Either all are stored or none.
    async fn add_all(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        payloads: &[Payload],
    ) -> Result<(), IndexError>;

    /// Return at most `max_results` matches scoring at least `min_score`,
    /// sorted by descending score.
    async fn search(
        &self,
        query: &[f32],
        max_results: usize,
        min_score: f32,
    ) -> Result<Vec<IndexMatch>, IndexError>;

    /// Delete the given ids, returning how many were present.
    async fn remove(&self, ids: &[String]) -> Result<usize, IndexError>;

    async fn len(&self) -> Result<usize, IndexError>;

    async fn is_empty(&self) -> Result<bool, IndexError> {
        Ok(self.len().await? == 0)
    }
}

/// Validate that a batch is well-formed before any backend writes it.
pub fn check_batch(
    ids: &[String],
    vectors: &[Vec<f32>],
    payloads: &[Payload],
) -> Result<(), IndexError> {
    if ids.len() != vectors.len() || ids.len() != payloads.len() {
        return Err(IndexError::LengthMismatch {
            ids: ids.len(),
            vectors: vectors.len(),
            payloads: payloads.len(),
        });
    }
    if let Some(first) = vectors.first() {
        if let Some(bad) = vectors.iter().find(|v| v.len() != first.len()) {
            return Err(IndexError::DimensionMismatch {
                expected: first.len(),
                actual: bad.len(),
            });
        }
    }
    Ok(())
}

/// Sort matches best-first, keeping insertion order for ties.
pub fn rank(matches: &mut Vec<IndexMatch>, max_results: usize) {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    matches.truncate(max_results);
}
