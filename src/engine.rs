//! Lazily constructed embedding provider and vector index.
//!
//! [`Engine::initialize`] builds both collaborators exactly once, even when
//! several tasks race on the first call. The outcome is sticky: after a
//! failed initialization the engine stays unavailable for the life of the
//! process, and retrieval degrades to empty results.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{info, warn};

use kb_harness_core::embedding::EmbeddingProvider;
use kb_harness_core::index::memory::InMemoryVectorIndex;
use kb_harness_core::index::VectorIndex;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::InitializationError;
use crate::sqlite_index::SqliteVectorIndex;

/// The initialized collaborators, cheap to clone.
#[derive(Clone)]
pub struct Components {
    pub provider: Arc<dyn EmbeddingProvider>,
    pub index: Arc<dyn VectorIndex>,
}

enum Source {
    Config(Box<Config>),
    Parts(Components),
}

pub struct Engine {
    source: Source,
    cell: OnceCell<Result<Components, InitializationError>>,
}

impl Engine {
    /// An engine that builds its collaborators from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            source: Source::Config(Box::new(config.clone())),
            cell: OnceCell::new(),
        }
    }

    /// An engine over caller-supplied collaborators. Initialization still
    /// probes the provider.
    pub fn from_parts(provider: Arc<dyn EmbeddingProvider>, index: Arc<dyn VectorIndex>) -> Self {
        Self {
            source: Source::Parts(Components { provider, index }),
            cell: OnceCell::new(),
        }
    }

    pub async fn initialize(&self) -> Result<Components, InitializationError> {
        self.cell.get_or_init(|| self.build()).await.clone()
    }

    /// The collaborators if initialization has already succeeded.
    pub fn components(&self) -> Option<&Components> {
        self.cell.get().and_then(|r| r.as_ref().ok())
    }

    pub fn is_available(&self) -> bool {
        self.components().is_some()
    }

    async fn build(&self) -> Result<Components, InitializationError> {
        let result = match &self.source {
            Source::Parts(parts) => probe(parts.clone()).await,
            Source::Config(config) => build_from_config(config).await,
        };
        match &result {
            Ok(c) => info!(model = c.provider.model_name(), "embedding engine ready"),
            Err(e) => warn!(error = %e, "embedding engine unavailable"),
        }
        result
    }
}

async fn build_from_config(config: &Config) -> Result<Components, InitializationError> {
    let provider = create_provider(&config.embedding)
        .map_err(|e| InitializationError::Provider(format!("{e:#}")))?;

    let index: Arc<dyn VectorIndex> = match config.index.backend.as_str() {
        "memory" => Arc::new(InMemoryVectorIndex::new()),
        _ => Arc::new(
            SqliteVectorIndex::open(&config.vector_db_path())
                .await
                .map_err(|e| InitializationError::Index(format!("{e:#}")))?,
        ),
    };

    probe(Components { provider, index }).await
}

/// One round trip through the provider proves the model is reachable.
async fn probe(components: Components) -> Result<Components, InitializationError> {
    components.provider.embed("ping").await?;
    Ok(components)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kb_harness_core::embedding::ProviderError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "counting"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            if self.fail {
                return Err(ProviderError::Unavailable("down".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    fn engine(fail: bool) -> (Arc<Engine>, Arc<CountingProvider>) {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
            fail,
        });
        let engine = Engine::from_parts(provider.clone(), Arc::new(InMemoryVectorIndex::new()));
        (Arc::new(engine), provider)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_calls_initialize_once() {
        let (engine, provider) = engine(false);
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.initialize().await.is_ok() })
            })
            .collect();
        for t in tasks {
            assert!(t.await.unwrap());
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(engine.is_available());
    }

    #[tokio::test]
    async fn failure_is_sticky() {
        let (engine, provider) = engine(true);
        assert!(matches!(
            engine.initialize().await,
            Err(InitializationError::Probe(ProviderError::Unavailable(_)))
        ));
        assert!(engine.initialize().await.is_err());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(!engine.is_available());
        assert!(engine.components().is_none());
    }

    #[tokio::test]
    async fn disabled_provider_fails_probe() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut config = Config::with_data_dir(tmp.path());
        config.embedding.provider = "disabled".into();
        config.index.backend = "memory".into();
        let engine = Engine::from_config(&config);
        assert!(matches!(
            engine.initialize().await,
            Err(InitializationError::Probe(ProviderError::Disabled))
        ));
    }
}
