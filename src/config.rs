//! TOML configuration.
//!
//! Every section has serde defaults, so an empty file (or no file at all,
//! via [`Config::default`]) yields a working local setup: Ollama embeddings,
//! a SQLite vector index, and data under the per-user data directory.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use kb_harness_core::retrieval::RetrievalParams;
use kb_harness_core::split::SplitterConfig;

/// File name of the metadata snapshot inside the data directory.
pub const SNAPSHOT_FILE: &str = "knowledge_base.json";
/// File name of the SQLite vector index inside the data directory.
pub const VECTOR_DB_FILE: &str = "vectors.sqlite";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("kb-harness"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    500
}
fn default_overlap_chars() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestionConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_workers() -> usize {
    2
}
fn default_shutdown_grace_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_oversample_factor")]
    pub oversample_factor: usize,
    #[serde(default = "default_min_score")]
    pub min_score: f32,
    #[serde(default = "default_max_escalations")]
    pub max_escalations: usize,
    #[serde(default = "default_purge_on_delete")]
    pub purge_on_delete: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            oversample_factor: default_oversample_factor(),
            min_score: default_min_score(),
            max_escalations: default_max_escalations(),
            purge_on_delete: default_purge_on_delete(),
        }
    }
}

fn default_top_k() -> usize {
    3
}
fn default_oversample_factor() -> usize {
    3
}
fn default_min_score() -> f32 {
    0.2
}
fn default_max_escalations() -> usize {
    2
}
fn default_purge_on_delete() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "ollama".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

fn default_backend() -> String {
    "sqlite".to_string()
}

impl Config {
    /// A default configuration rooted at `dir`.
    pub fn with_data_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            data: DataConfig { dir: dir.into() },
            ..Default::default()
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.data.dir.join(SNAPSHOT_FILE)
    }

    pub fn vector_db_path(&self) -> PathBuf {
        self.data.dir.join(VECTOR_DB_FILE)
    }

    pub fn splitter(&self) -> SplitterConfig {
        SplitterConfig {
            max_chars: self.chunking.max_chars,
            overlap_chars: self.chunking.overlap_chars,
        }
    }

    pub fn retrieval_params(&self) -> RetrievalParams {
        RetrievalParams {
            oversample_factor: self.retrieval.oversample_factor,
            filtered_min_score: self.retrieval.min_score,
            max_escalations: self.retrieval.max_escalations,
        }
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_chars == 0 {
            anyhow::bail!("chunking.max_chars must be > 0");
        }
        if self.chunking.overlap_chars >= self.chunking.max_chars {
            anyhow::bail!("chunking.overlap_chars must be < chunking.max_chars");
        }
        if self.ingestion.workers == 0 {
            anyhow::bail!("ingestion.workers must be >= 1");
        }
        if self.retrieval.oversample_factor == 0 {
            anyhow::bail!("retrieval.oversample_factor must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.retrieval.min_score) {
            anyhow::bail!("retrieval.min_score must be in [0.0, 1.0]");
        }
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "ollama" | "local" | "hashing" => {}
            "openai" => {
                if self.embedding.model.is_none() {
                    anyhow::bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, ollama, openai, local, or hashing.",
                other
            ),
        }

        match self.index.backend.as_str() {
            "sqlite" | "memory" => {}
            other => anyhow::bail!(
                "Unknown index backend: '{}'. Must be sqlite or memory.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.chunking.max_chars, 500);
        assert_eq!(config.chunking.overlap_chars, 50);
        assert_eq!(config.ingestion.workers, 2);
        assert_eq!(config.retrieval.oversample_factor, 3);
        assert!((config.retrieval.min_score - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.index.backend, "sqlite");
        assert!(config.retrieval.purge_on_delete);
    }

    #[test]
    fn openai_requires_model() {
        let err = parse("[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
        assert!(parse("[embedding]\nprovider = \"ollama\"\n").is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse("[embedding]\nprovider = \"hashing\"\n[ingestion]\nworkers = 0\n").is_err());
        assert!(parse("[embedding]\nprovider = \"hashing\"\n[chunking]\nmax_chars = 50\noverlap_chars = 50\n").is_err());
        assert!(parse("[embedding]\nprovider = \"bogus\"\n").is_err());
        assert!(parse("[embedding]\nprovider = \"hashing\"\n[index]\nbackend = \"faiss\"\n").is_err());
    }

    #[test]
    fn paths_live_under_data_dir() {
        let config = Config::with_data_dir("/tmp/kb");
        assert_eq!(config.snapshot_path(), PathBuf::from("/tmp/kb/knowledge_base.json"));
        assert_eq!(config.vector_db_path(), PathBuf::from("/tmp/kb/vectors.sqlite"));
    }
}
