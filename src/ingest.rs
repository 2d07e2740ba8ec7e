//! Ingestion pipeline: parse → split → embed → store.
//!
//! Documents are processed by a fixed number of worker tasks pulling jobs
//! from a shared queue. Each job is atomic at document granularity: the
//! vectors for a document are written in a single `add_all` call after
//! every earlier stage has succeeded, so a failure anywhere leaves nothing
//! in the index. Failures are captured into the document's ERROR status and
//! never retried automatically.
//!
//! Progress is reported through the registry as the job advances:
//! indeterminate on entering INDEXING, then 0.25 after parsing, 0.5 after
//! splitting, 0.8 after embedding and 1.0 at READY.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use kb_harness_core::index::Payload;
use kb_harness_core::models::FileFormat;
use kb_harness_core::split::{segment_document, SegmentSource, SplitterConfig};

use crate::engine::Engine;
use crate::error::IngestError;
use crate::parse::{parser_for, ParseError};
use crate::registry::{IngestToken, Registry};
use crate::store::MetadataStore;

const PROGRESS_PARSED: f32 = 0.25;
const PROGRESS_SPLIT: f32 = 0.5;
const PROGRESS_EMBEDDED: f32 = 0.8;

/// One document queued for ingestion.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub file_name: String,
    pub file_path: PathBuf,
    pub collection_id: String,
    /// Registration this job was queued for.
    pub token: IngestToken,
}

/// Shared state every worker needs.
pub struct PipelineContext {
    pub registry: Arc<Registry>,
    pub store: Arc<MetadataStore>,
    pub engine: Arc<Engine>,
    pub splitter: SplitterConfig,
    pub purge_on_delete: bool,
}

type JobQueue = Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<IngestJob>>>;

/// Bounded pool of ingestion workers.
pub struct IngestionPipeline {
    sender: Mutex<Option<mpsc::UnboundedSender<IngestJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    registry: Arc<Registry>,
    grace: Duration,
}

impl IngestionPipeline {
    /// Spawn `workers` tasks on the current tokio runtime.
    pub fn start(ctx: PipelineContext, workers: usize, grace: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue: JobQueue = Arc::new(tokio::sync::Mutex::new(rx));
        let registry = ctx.registry.clone();
        let ctx = Arc::new(ctx);

        let handles = (0..workers.max(1))
            .map(|id| tokio::spawn(worker_loop(id, queue.clone(), ctx.clone())))
            .collect();

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
            registry,
            grace,
        }
    }

    /// Queue a job. Fails once the pool has been shut down.
    pub fn submit(&self, job: IngestJob) -> Result<(), IngestError> {
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        match sender.as_ref() {
            Some(tx) => tx.send(job).map_err(|_| IngestError::ShutDown),
            None => Err(IngestError::ShutDown),
        }
    }

    /// Stop accepting jobs, let queued and in-flight work finish within the
    /// grace period, then abort whatever is left. Documents that never
    /// reached a terminal status are marked ERROR.
    pub async fn shutdown(&self) {
        drop(
            self.sender
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let mut handles =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        if handles.is_empty() {
            return;
        }

        let drained = tokio::time::timeout(self.grace, async {
            for handle in handles.iter_mut() {
                let _ = handle.await;
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                grace_secs = self.grace.as_secs_f32(),
                "ingestion did not drain in time; cancelling remaining work"
            );
            for handle in &handles {
                handle.abort();
            }
        }

        let failed = self
            .registry
            .fail_unfinished(&IngestError::ShutDown.to_string());
        if failed > 0 {
            warn!(documents = failed, "documents left unprocessed at shutdown");
        }
    }
}

async fn worker_loop(id: usize, queue: JobQueue, ctx: Arc<PipelineContext>) {
    loop {
        let job = { queue.lock().await.recv().await };
        let Some(job) = job else { break };
        run_job(&ctx, job).await;
    }
    debug!(worker = id, "ingestion worker stopped");
}

async fn run_job(ctx: &PipelineContext, job: IngestJob) {
    if ctx.registry.begin_indexing(&job.file_name, job.token).is_none() {
        debug!(file = %job.file_name, "document removed before ingestion started");
        return;
    }
    info!(file = %job.file_name, "ingesting document");

    match process(ctx, &job).await {
        Ok(segment_ids) => {
            let count = segment_ids.len();
            if ctx
                .registry
                .mark_ready(&job.file_name, job.token, segment_ids.clone())
                .is_some()
            {
                info!(file = %job.file_name, segments = count, "document ready");
                ctx.store
                    .clone()
                    .persist_blocking(ctx.registry.clone())
                    .await;
            } else {
                // Deleted (and possibly re-added) while in flight: leave the
                // registry alone and drop what was just written.
                info!(file = %job.file_name, "document deleted during ingestion");
                if ctx.purge_on_delete {
                    purge(ctx, &segment_ids).await;
                }
            }
        }
        Err(e) => {
            warn!(file = %job.file_name, error = %e, "ingestion failed");
            ctx.registry.mark_error(&job.file_name, job.token, e.to_string());
        }
    }
}

async fn purge(ctx: &PipelineContext, ids: &[String]) {
    let Some(components) = ctx.engine.components() else {
        return;
    };
    if let Err(e) = components.index.remove(ids).await {
        warn!(error = %e, "failed to remove vectors of deleted document");
    }
}

/// Run every stage for one document, returning the ids written to the index.
async fn process(ctx: &PipelineContext, job: &IngestJob) -> Result<Vec<String>, IngestError> {
    let components = ctx
        .engine
        .initialize()
        .await
        .map_err(|_| IngestError::EngineUnavailable)?;

    // 1. Parse
    let bytes = tokio::fs::read(&job.file_path)
        .await
        .map_err(|source| IngestError::Io {
            path: job.file_path.clone(),
            source,
        })?;
    let format = FileFormat::from_file_name(&job.file_name).unwrap_or(FileFormat::Text);
    let parsed = tokio::task::spawn_blocking(move || parser_for(format).parse(&bytes))
        .await
        .map_err(|e| ParseError::Aborted(e.to_string()))??;
    ctx.registry
        .report_progress(&job.file_name, job.token, PROGRESS_PARSED);

    // 2-3. Split and attach metadata
    let file_path = job.file_path.to_string_lossy();
    let segments = segment_document(
        &parsed,
        SegmentSource {
            file_name: &job.file_name,
            file_path: &file_path,
            collection_id: &job.collection_id,
        },
        ctx.splitter,
    );
    if segments.is_empty() {
        return Err(IngestError::EmptyDocument);
    }
    ctx.registry
        .report_progress(&job.file_name, job.token, PROGRESS_SPLIT);

    // 4. Embed every segment in one logical call
    let texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
    let vectors = components.provider.embed_batch(&texts).await?;
    if vectors.len() != texts.len() {
        return Err(kb_harness_core::embedding::ProviderError::CountMismatch {
            expected: texts.len(),
            actual: vectors.len(),
        }
        .into());
    }
    ctx.registry
        .report_progress(&job.file_name, job.token, PROGRESS_EMBEDDED);

    // 5. Store under fresh ids
    let ids: Vec<String> = segments
        .iter()
        .map(|_| Uuid::new_v4().to_string())
        .collect();
    let payloads: Vec<Payload> = segments
        .into_iter()
        .map(|s| Payload {
            metadata: s.metadata_map(),
            text: s.text,
        })
        .collect();
    components.index.add_all(&ids, &vectors, &payloads).await?;

    Ok(ids)
}
