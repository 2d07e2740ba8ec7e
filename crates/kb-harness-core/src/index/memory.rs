//! In-memory [`VectorIndex`] implementation for tests and ephemeral use.
//!
//! Entries live in a `Vec` behind `std::sync::RwLock`: searches take the
//! read lock, batch inserts and removals take the write lock, so readers
//! never observe a half-written batch. Search is brute-force cosine
//! similarity over all stored vectors.

use std::collections::HashSet;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;

use super::{check_batch, rank, IndexError, IndexMatch, Payload, VectorIndex};

struct StoredVector {
    id: String,
    vector: Vec<f32>,
    payload: Payload,
}

/// In-memory vector index.
pub struct InMemoryVectorIndex {
    entries: RwLock<Vec<StoredVector>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<StoredVector>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<StoredVector>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn add_all(
        &self,
        ids: &[String],
        vectors: &[Vec<f32>],
        payloads: &[Payload],
    ) -> Result<(), IndexError> {
        check_batch(ids, vectors, payloads)?;
        let mut entries = self.write();
        if let (Some(existing), Some(incoming)) = (entries.first(), vectors.first()) {
            if existing.vector.len() != incoming.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: existing.vector.len(),
                    actual: incoming.len(),
                });
            }
        }
        let incoming: HashSet<&str> = ids.iter().map(String::as_str).collect();
        entries.retain(|e| !incoming.contains(e.id.as_str()));
        for ((id, vector), payload) in ids.iter().zip(vectors).zip(payloads) {
            entries.push(StoredVector {
                id: id.clone(),
                vector: vector.clone(),
                payload: payload.clone(),
            });
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        max_results: usize,
        min_score: f32,
    ) -> Result<Vec<IndexMatch>, IndexError> {
        if max_results == 0 {
            return Ok(Vec::new());
        }
        let entries = self.read();
        let mut matches: Vec<IndexMatch> = entries
            .iter()
            .filter_map(|e| {
                let score = cosine_similarity(query, &e.vector);
                (score >= min_score).then(|| IndexMatch {
                    id: e.id.clone(),
                    score,
                    payload: e.payload.clone(),
                })
            })
            .collect();
        rank(&mut matches, max_results);
        Ok(matches)
    }

    async fn remove(&self, ids: &[String]) -> Result<usize, IndexError> {
        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|e| !doomed.contains(e.id.as_str()));
        Ok(before - entries.len())
    }

    async fn len(&self) -> Result<usize, IndexError> {
        Ok(self.read().len())
    }
}
