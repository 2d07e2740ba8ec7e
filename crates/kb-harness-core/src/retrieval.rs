//! Collection-scoped semantic retrieval.
//!
//! The retrieval algorithm operates entirely through the
//! [`EmbeddingProvider`] and [`VectorIndex`] traits. Because the index has
//! no native metadata filter, collection scoping is done by oversampling:
//!
//! 1. Embed the query. Failure yields an empty result set, never an error.
//! 2. Without a collection filter, request exactly `top_k` candidates with
//!    no score floor.
//! 3. With a filter, request `top_k × oversample_factor` candidates with a
//!    minimum score of `filtered_min_score`.
//! 4. Walk candidates best-first, skipping any whose `collection_id`
//!    metadata is missing or outside the requested set, until `top_k` are
//!    accepted.
//! 5. If fewer than `top_k` were accepted and the index filled the request
//!    (so more candidates may exist), double the request and retry, up to
//!    `max_escalations` extra rounds.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::index::{IndexMatch, VectorIndex};
use crate::models::{keys, RetrievalResult};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Candidate multiplier applied when a collection filter is present.
    pub oversample_factor: usize,
    /// Minimum similarity for candidates when filtering.
    pub filtered_min_score: f32,
    /// Extra doubling rounds allowed when filtering under-fills `top_k`.
    pub max_escalations: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            oversample_factor: 3,
            filtered_min_score: 0.2,
            max_escalations: 2,
        }
    }
}

/// Bundles the inputs for a single query.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalRequest<'a> {
    pub query: &'a str,
    pub top_k: usize,
    /// Restrict results to these collections; empty means no restriction.
    pub collection_ids: &'a [String],
}

/// Run a query against an index. Never fails: errors are logged and
/// degrade to an empty (or partial) result list.
pub async fn retrieve(
    provider: &dyn EmbeddingProvider,
    index: &dyn VectorIndex,
    req: RetrievalRequest<'_>,
    params: &RetrievalParams,
) -> Vec<RetrievalResult> {
    if req.top_k == 0 || req.query.trim().is_empty() {
        return Vec::new();
    }

    let query_vec = match provider.embed(req.query).await {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "query embedding failed; returning no results");
            return Vec::new();
        }
    };

    if req.collection_ids.is_empty() {
        return match index.search(&query_vec, req.top_k, 0.0).await {
            Ok(candidates) => select_matches(&candidates, req.top_k, None),
            Err(e) => {
                warn!(error = %e, "vector search failed; returning no results");
                Vec::new()
            }
        };
    }

    let filter: HashSet<&str> = req.collection_ids.iter().map(String::as_str).collect();
    let mut requested = req.top_k.saturating_mul(params.oversample_factor.max(1));
    let mut round = 0;

    loop {
        let candidates = match index
            .search(&query_vec, requested, params.filtered_min_score)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, requested, "vector search failed; returning no results");
                return Vec::new();
            }
        };
        let accepted = select_matches(&candidates, req.top_k, Some(&filter));
        let exhausted = candidates.len() < requested;

        if accepted.len() >= req.top_k || exhausted || round >= params.max_escalations {
            debug!(
                requested,
                candidates = candidates.len(),
                accepted = accepted.len(),
                rounds = round + 1,
                "filtered retrieval finished"
            );
            return accepted;
        }

        round += 1;
        requested = requested.saturating_mul(2);
    }
}

/// Accept candidates best-first until `top_k` are collected.
///
/// With a filter, candidates whose `collection_id` metadata is missing or
/// not in the set are skipped.
pub fn select_matches(
    candidates: &[IndexMatch],
    top_k: usize,
    filter: Option<&HashSet<&str>>,
) -> Vec<RetrievalResult> {
    let mut ordered: Vec<&IndexMatch> = candidates.iter().collect();
    ordered.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    ordered
        .into_iter()
        .filter(|m| match filter {
            Some(allowed) => m
                .payload
                .get(keys::COLLECTION_ID)
                .is_some_and(|c| allowed.contains(c)),
            None => true,
        })
        .take(top_k)
        .map(to_result)
        .collect()
}

fn to_result(m: &IndexMatch) -> RetrievalResult {
    RetrievalResult {
        content: m.payload.text.clone(),
        file_name: m.payload.get(keys::FILE_NAME).unwrap_or_default().to_string(),
        page_number: m
            .payload
            .get(keys::PAGE_NUMBER)
            .and_then(|p| p.trim().parse::<u32>().ok()),
        score: m.score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::ProviderError;
    use crate::index::memory::InMemoryVectorIndex;
    use crate::index::{IndexError, Payload};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Embeds every text to the same fixed direction.
    struct ConstantProvider(Vec<f32>);

    #[async_trait]
    impl EmbeddingProvider for ConstantProvider {
        fn model_name(&self) -> &str {
            "constant"
        }
        fn dims(&self) -> usize {
            self.0.len()
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Ok(texts.iter().map(|_| self.0.clone()).collect())
        }
    }

    struct DownProvider;

    #[async_trait]
    impl EmbeddingProvider for DownProvider {
        fn model_name(&self) -> &str {
            "down"
        }
        fn dims(&self) -> usize {
            0
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            Err(ProviderError::Unavailable("connection refused".into()))
        }
    }

    /// Records every `max_results` it is asked for.
    struct RecordingIndex {
        inner: InMemoryVectorIndex,
        requests: Mutex<Vec<(usize, f32)>>,
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn add_all(
            &self,
            ids: &[String],
            vectors: &[Vec<f32>],
            payloads: &[Payload],
        ) -> Result<(), IndexError> {
            self.inner.add_all(ids, vectors, payloads).await
        }
        async fn search(
            &self,
            query: &[f32],
            max_results: usize,
            min_score: f32,
        ) -> Result<Vec<IndexMatch>, IndexError> {
            self.requests.lock().unwrap().push((max_results, min_score));
            self.inner.search(query, max_results, min_score).await
        }
        async fn remove(&self, ids: &[String]) -> Result<usize, IndexError> {
            self.inner.remove(ids).await
        }
        async fn len(&self) -> Result<usize, IndexError> {
            self.inner.len().await
        }
    }

    fn payload(text: &str, collection: Option<&str>, page: Option<&str>) -> Payload {
        let mut metadata = BTreeMap::new();
        metadata.insert(keys::FILE_NAME.to_string(), format!("{}.md", text));
        if let Some(c) = collection {
            metadata.insert(keys::COLLECTION_ID.to_string(), c.to_string());
        }
        if let Some(p) = page {
            metadata.insert(keys::PAGE_NUMBER.to_string(), p.to_string());
        }
        Payload {
            text: text.to_string(),
            metadata,
        }
    }

    /// Seeds `n` entries per collection; scores decrease with position and
    /// collection "A" entries rank below every "B" entry.
    async fn seeded(n: usize) -> RecordingIndex {
        let index = RecordingIndex {
            inner: InMemoryVectorIndex::new(),
            requests: Mutex::new(Vec::new()),
        };
        let mut ids = Vec::new();
        let mut vectors = Vec::new();
        let mut payloads = Vec::new();
        for i in 0..n {
            ids.push(format!("b{}", i));
            vectors.push(vec![1.0, 0.01 * i as f32]);
            payloads.push(payload(&format!("b{}", i), Some("B"), None));
        }
        for i in 0..n {
            ids.push(format!("a{}", i));
            vectors.push(vec![1.0, 0.5 + 0.01 * i as f32]);
            payloads.push(payload(&format!("a{}", i), Some("A"), Some("7")));
        }
        index.add_all(&ids, &vectors, &payloads).await.unwrap();
        index
    }

    #[tokio::test]
    async fn unfiltered_requests_exactly_top_k() {
        let index = seeded(5).await;
        let provider = ConstantProvider(vec![1.0, 0.0]);
        let req = RetrievalRequest {
            query: "q",
            top_k: 3,
            collection_ids: &[],
        };
        let results = retrieve(&provider, &index, req, &RetrievalParams::default()).await;
        assert_eq!(results.len(), 3);
        assert_eq!(*index.requests.lock().unwrap(), vec![(3, 0.0)]);
    }

    #[tokio::test]
    async fn filtered_results_only_come_from_requested_collections() {
        let index = seeded(10).await;
        let provider = ConstantProvider(vec![1.0, 0.0]);
        let wanted = vec!["A".to_string()];
        let req = RetrievalRequest {
            query: "q",
            top_k: 3,
            collection_ids: &wanted,
        };
        let results = retrieve(&provider, &index, req, &RetrievalParams::default()).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.file_name.starts_with('a')));
        assert!(results.iter().all(|r| r.page_number == Some(7)));
    }

    #[tokio::test]
    async fn escalation_doubles_request_until_filled() {
        let index = seeded(20).await;
        let provider = ConstantProvider(vec![1.0, 0.0]);
        let wanted = vec!["A".to_string()];
        let req = RetrievalRequest {
            query: "q",
            top_k: 3,
            collection_ids: &wanted,
        };
        retrieve(&provider, &index, req, &RetrievalParams::default()).await;
        let sizes: Vec<usize> = index.requests.lock().unwrap().iter().map(|r| r.0).collect();
        // 9 and 18 candidates are all "B"; 36 reaches into "A".
        assert_eq!(sizes, vec![9, 18, 36]);
        assert!(index.requests.lock().unwrap().iter().all(|r| r.1 == 0.2));
    }

    #[tokio::test]
    async fn no_escalation_returns_shortfall() {
        let index = seeded(20).await;
        let provider = ConstantProvider(vec![1.0, 0.0]);
        let wanted = vec!["A".to_string()];
        let params = RetrievalParams {
            max_escalations: 0,
            ..Default::default()
        };
        let req = RetrievalRequest {
            query: "q",
            top_k: 3,
            collection_ids: &wanted,
        };
        let results = retrieve(&provider, &index, req, &params).await;
        assert!(results.is_empty());
        assert_eq!(index.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn provider_failure_yields_empty() {
        let index = seeded(3).await;
        let req = RetrievalRequest {
            query: "q",
            top_k: 3,
            collection_ids: &[],
        };
        let results = retrieve(&DownProvider, &index, req, &RetrievalParams::default()).await;
        assert!(results.is_empty());
        assert!(index.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn select_skips_missing_collection_and_bad_page() {
        let candidates = vec![
            IndexMatch {
                id: "1".into(),
                score: 0.9,
                payload: payload("orphan", None, None),
            },
            IndexMatch {
                id: "2".into(),
                score: 0.8,
                payload: payload("kept", Some("A"), Some("not-a-number")),
            },
        ];
        let allowed: HashSet<&str> = ["A"].into_iter().collect();
        let results = select_matches(&candidates, 5, Some(&allowed));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "kept");
        assert_eq!(results[0].page_number, None);

        let unfiltered = select_matches(&candidates, 5, None);
        assert_eq!(unfiltered.len(), 2);
    }
}
