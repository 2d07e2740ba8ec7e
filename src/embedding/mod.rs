//! Concrete [`EmbeddingProvider`] implementations.
//!
//! - **[`DisabledProvider`]**: every call fails; used when embeddings are off.
//! - **[`OllamaProvider`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **[`OpenAIProvider`]**: the OpenAI embeddings API.
//! - **[`HashingProvider`]**: deterministic, offline, feature-hashed
//!   bag-of-words vectors (lexical similarity only).
//! - **`LocalProvider`**: in-process fastembed model
//!   (feature `local-embeddings-fastembed`).
//!
//! Use [`create_provider`] to build the one named by configuration.
//!
//! # Retry Strategy
//!
//! The HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 and 5xx → retry
//! - other HTTP 4xx → fail immediately
//! - network errors → retry
//! - backoff: 1s, 2s, 4s, … (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};

use kb_harness_core::embedding::{EmbeddingProvider, ProviderError};

use crate::config::EmbeddingConfig;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";
const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_HASHING_DIMS: usize = 256;

/// Create the provider named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"hashing"` | [`HashingProvider`] |
/// | `"local"` | `LocalProvider` (feature `local-embeddings-fastembed`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        "hashing" => Ok(Arc::new(HashingProvider::new(
            config.dims.unwrap_or(DEFAULT_HASHING_DIMS),
        ))),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(local::LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// A provider that refuses every request.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Err(ProviderError::Disabled)
    }
}

// ============ Ollama Provider ============

/// Embedding provider backed by a local Ollama instance.
///
/// Calls `POST {url}/api/embed` (default `http://localhost:11434`) and
/// requires the model to be pulled (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            dims: config.dims.unwrap_or(0),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({ "model": self.model, "input": batch });
            let json =
                post_json_with_retry(&self.client, &endpoint, None, &body, self.max_retries)
                    .await?;
            out.extend(parse_ollama_response(&json)?);
        }
        ensure_count(texts.len(), out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse("missing embeddings array".into()))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| to_f32_vec(values))
                .ok_or_else(|| ProviderError::InvalidResponse("embedding is not an array".into()))
        })
        .collect()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Fails if `model` is not configured or `OPENAI_API_KEY` is unset.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key,
            model,
            dims: config.dims.unwrap_or(0),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({ "model": self.model, "input": batch });
            let json = post_json_with_retry(
                &self.client,
                OPENAI_EMBEDDINGS_URL,
                Some(&self.api_key),
                &body,
                self.max_retries,
            )
            .await?;
            out.extend(parse_openai_response(&json)?);
        }
        ensure_count(texts.len(), out)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse("missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| ProviderError::InvalidResponse("missing embedding".into()))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        indexed.push((index, to_f32_vec(embedding)));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Hashing Provider ============

/// Deterministic offline embedder.
///
/// Lowercased alphanumeric tokens are hashed (SHA-256) into `dims` signed
/// buckets and the result is L2-normalized, so texts sharing words have
/// positive cosine similarity. Text with no tokens embeds to the zero vector.
pub struct HashingProvider {
    dims: usize,
}

impl HashingProvider {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let bucket = u64::from_le_bytes([
                digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6],
                digest[7],
            ]) as usize
                % self.dims;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingProvider {
    fn model_name(&self) -> &str {
        "hashing"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

// ============ Local Provider (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use std::sync::{Arc, Mutex};

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use kb_harness_core::embedding::{EmbeddingProvider, ProviderError};

    use crate::config::EmbeddingConfig;

    /// In-process embeddings. The model is downloaded from Hugging Face on
    /// first use and cached; after that no network calls are made.
    pub struct LocalProvider {
        model_name: String,
        dims: usize,
        batch_size: usize,
        model: Arc<Mutex<fastembed::TextEmbedding>>,
    }

    impl LocalProvider {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
            let (fastembed_model, default_dims) = to_fastembed_model(&model_name)?;
            let model = fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
            )
            .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;
            Ok(Self {
                model_name,
                dims: config.dims.unwrap_or(default_dims),
                batch_size: config.batch_size,
                model: Arc::new(Mutex::new(model)),
            })
        }
    }

    fn to_fastembed_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
        match name {
            "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
            "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
            "bge-base-en-v1.5" => Ok((fastembed::EmbeddingModel::BGEBaseENV15, 768)),
            "nomic-embed-text-v1.5" => Ok((fastembed::EmbeddingModel::NomicEmbedTextV15, 768)),
            "multilingual-e5-small" => Ok((fastembed::EmbeddingModel::MultilingualE5Small, 384)),
            "multilingual-e5-base" => Ok((fastembed::EmbeddingModel::MultilingualE5Base, 768)),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, \
                 nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base",
                other
            ),
        }
    }

    #[async_trait]
    impl EmbeddingProvider for LocalProvider {
        fn model_name(&self) -> &str {
            &self.model_name
        }
        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            let model = Arc::clone(&self.model);
            let texts = texts.to_vec();
            let batch_size = self.batch_size;
            tokio::task::spawn_blocking(move || {
                let mut model = model.lock().unwrap_or_else(|e| e.into_inner());
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| ProviderError::Request(e.to_string()))
            })
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?
        }
    }
}

// ============ Shared HTTP helpers ============

async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value, ProviderError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json()
                        .await
                        .map_err(|e| ProviderError::InvalidResponse(e.to_string()));
                }
                let body_text = response.text().await.unwrap_or_default();
                let err = ProviderError::Api {
                    status: status.as_u16(),
                    body: body_text,
                };
                // Rate limited or server error: retry. Other client errors: give up.
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(ProviderError::Request(format!("{} ({})", e, url)));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ProviderError::Request("embedding failed after retries".into())))
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

fn ensure_count(expected: usize, vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>, ProviderError> {
    if vectors.len() != expected {
        return Err(ProviderError::CountMismatch {
            expected,
            actual: vectors.len(),
        });
    }
    Ok(vectors)
}
