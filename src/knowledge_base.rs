//! The knowledge-base service handle.
//!
//! [`KnowledgeBase`] owns the registries, the metadata store, the lazily
//! initialized embedding engine and the ingestion worker pool. It is built
//! once at startup and shared by reference (typically in an `Arc`).
//!
//! Every mutating operation persists the snapshot afterwards. Nothing here
//! returns an error to a chat-style caller: validation failures come back
//! from [`KnowledgeBase::add_document`], ingestion failures land in the
//! document's status, and query failures degrade to an empty list.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{info, warn};

use kb_harness_core::embedding::EmbeddingProvider;
use kb_harness_core::index::VectorIndex;
use kb_harness_core::models::{Collection, Document, RetrievalResult};
use kb_harness_core::prompt;
use kb_harness_core::retrieval::{retrieve, RetrievalRequest};

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{InitializationError, ValidationError};
use crate::ingest::{IngestJob, IngestionPipeline, PipelineContext};
use crate::registry::{DocumentEvent, IngestHandle, Registry};
use crate::store::MetadataStore;

pub struct KnowledgeBase {
    config: Config,
    registry: Arc<Registry>,
    store: Arc<MetadataStore>,
    engine: Arc<Engine>,
    pipeline: IngestionPipeline,
}

impl KnowledgeBase {
    /// Load persisted state and start the worker pool. The embedding engine
    /// is built from `config` on the first [`initialize`](Self::initialize)
    /// or ingestion job. Must be called inside a tokio runtime.
    pub async fn open(config: Config) -> Result<Self> {
        let engine = Engine::from_config(&config);
        Self::with_engine(config, engine).await
    }

    /// Like [`open`](Self::open) but over caller-supplied collaborators.
    pub async fn open_with(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn VectorIndex>,
    ) -> Result<Self> {
        Self::with_engine(config, Engine::from_parts(provider, index)).await
    }

    async fn with_engine(config: Config, engine: Engine) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(MetadataStore::new(config.snapshot_path()));
        let loaded = store.load();
        info!(
            collections = loaded.collections.len(),
            documents = loaded.documents.len(),
            "loaded knowledge base"
        );
        let registry = Arc::new(Registry::restore(loaded.collections, loaded.documents));
        let engine = Arc::new(engine);

        let pipeline = IngestionPipeline::start(
            PipelineContext {
                registry: registry.clone(),
                store: store.clone(),
                engine: engine.clone(),
                splitter: config.splitter(),
                purge_on_delete: config.retrieval.purge_on_delete,
            },
            config.ingestion.workers,
            Duration::from_secs(config.ingestion.shutdown_grace_secs),
        );

        let kb = Self {
            config,
            registry,
            store,
            engine,
            pipeline,
        };
        kb.default_collection();
        Ok(kb)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Build the embedding provider and vector index. Idempotent; a failure
    /// is remembered and returned again on every later call.
    pub async fn initialize(&self) -> Result<(), InitializationError> {
        self.engine.initialize().await.map(|_| ())
    }

    pub fn is_embedding_model_available(&self) -> bool {
        self.engine.is_available()
    }

    fn persist(&self) {
        self.store.persist(&self.registry);
    }

    // ---- collections ----

    pub fn collections(&self) -> Vec<Collection> {
        self.registry.collections()
    }

    /// Look a collection up by id, falling back to the first with that name.
    pub fn find_collection(&self, id_or_name: &str) -> Option<Collection> {
        let collections = self.registry.collections();
        collections
            .iter()
            .find(|c| c.id == id_or_name)
            .or_else(|| collections.iter().find(|c| c.name == id_or_name))
            .cloned()
    }

    pub fn create_collection(&self, name: &str) -> Collection {
        let collection = self.registry.create_collection(name);
        info!(id = %collection.id, name, "created collection");
        self.persist();
        collection
    }

    pub fn rename_collection(&self, id: &str, new_name: &str) -> bool {
        let renamed = self.registry.rename_collection(id, new_name);
        if renamed {
            self.persist();
        }
        renamed
    }

    /// Delete a collection and its documents. Their vectors are purged when
    /// `retrieval.purge_on_delete` is set, initializing the engine first if
    /// needed; otherwise they stay in the index,
    /// hidden from collection-scoped queries.
    pub async fn delete_collection(&self, id: &str) -> bool {
        let Some((collection, documents)) = self.registry.remove_collection(id) else {
            return false;
        };
        info!(name = %collection.name, documents = documents.len(), "deleted collection");
        self.store
            .clone()
            .persist_blocking(self.registry.clone())
            .await;

        let ids: Vec<String> = documents
            .into_iter()
            .flat_map(|d| d.segment_ids)
            .collect();
        self.purge(&ids).await;
        true
    }

    /// The "General" collection, created (and persisted) if missing.
    pub fn default_collection(&self) -> Collection {
        let (collection, created) = self.registry.default_collection();
        if created {
            self.persist();
        }
        collection
    }

    // ---- documents ----

    /// Register a file in a collection and queue it for ingestion.
    ///
    /// Validation happens before anything is queued: the extension must be
    /// txt, md or pdf, the file name must be unused in every collection, and
    /// the collection must exist.
    pub fn add_document(
        &self,
        path: &Path,
        collection_id: &str,
    ) -> Result<IngestHandle, ValidationError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let file_path = path.to_string_lossy();

        let (_, handle) = self
            .registry
            .insert_document(&file_name, &file_path, collection_id)?;
        self.persist();

        let token = handle.token();
        let job = IngestJob {
            file_name: file_name.clone(),
            file_path: path.to_path_buf(),
            collection_id: collection_id.to_string(),
            token,
        };
        if let Err(e) = self.pipeline.submit(job) {
            self.registry.begin_indexing(&file_name, token);
            self.registry.mark_error(&file_name, token, e.to_string());
        }
        Ok(handle)
    }

    pub async fn delete_document(&self, file_name: &str) -> bool {
        let Some(doc) = self.registry.remove_document(file_name) else {
            return false;
        };
        info!(file = file_name, "deleted document");
        self.store
            .clone()
            .persist_blocking(self.registry.clone())
            .await;
        self.purge(&doc.segment_ids).await;
        true
    }

    async fn purge(&self, ids: &[String]) {
        if !self.config.retrieval.purge_on_delete || ids.is_empty() {
            return;
        }
        let components = match self.engine.initialize().await {
            Ok(components) => components,
            Err(e) => {
                warn!(
                    segments = ids.len(),
                    error = %e,
                    "vector index unavailable; vectors left in index"
                );
                return;
            }
        };
        match components.index.remove(ids).await {
            Ok(n) => info!(removed = n, "purged vectors"),
            Err(e) => warn!(error = %e, "failed to purge vectors"),
        }
    }

    pub fn documents(&self) -> Vec<Document> {
        self.registry.documents()
    }

    pub fn documents_in(&self, collection_id: &str) -> Vec<Document> {
        self.registry.documents_in(collection_id)
    }

    pub fn document(&self, file_name: &str) -> Option<Document> {
        self.registry.document(file_name)
    }

    pub fn ready_count(&self) -> usize {
        self.registry.ready_count()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.registry.subscribe()
    }

    // ---- retrieval ----

    /// Retrieve up to `top_k` passages, restricted to `collection_ids` when
    /// non-empty. Returns an empty list if the engine is not initialized.
    pub async fn query(
        &self,
        text: &str,
        top_k: usize,
        collection_ids: &[String],
    ) -> Vec<RetrievalResult> {
        let Some(components) = self.engine.components() else {
            warn!("query before embedding engine initialized; returning no results");
            return Vec::new();
        };
        retrieve(
            components.provider.as_ref(),
            components.index.as_ref(),
            RetrievalRequest {
                query: text,
                top_k,
                collection_ids,
            },
            &self.config.retrieval_params(),
        )
        .await
    }

    pub fn build_prompt(&self, user_message: &str, results: &[RetrievalResult]) -> String {
        prompt::build_prompt(user_message, results)
    }

    /// Drain the worker pool within the configured grace period, then
    /// cancel the rest.
    pub async fn shutdown(&self) {
        self.pipeline.shutdown().await;
        info!("knowledge base shut down");
    }
}
