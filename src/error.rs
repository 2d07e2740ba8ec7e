//! Error taxonomy for the knowledge base.
//!
//! - [`ValidationError`] is returned synchronously from `add`; no background
//!   work is started.
//! - [`IngestError`] only occurs inside the ingestion pipeline and is
//!   captured into the document's `ERROR` status, never propagated.
//! - [`InitializationError`] leaves the engine uninitialized; queries then
//!   degrade to empty results.
//! - [`PersistenceError`] is logged and swallowed by the metadata store.

use std::path::PathBuf;

use thiserror::Error;

use kb_harness_core::embedding::ProviderError;
use kb_harness_core::index::IndexError;

use crate::parse::ParseError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unsupported file format '.{0}' (supported: txt, md, pdf)")]
    UnsupportedFormat(String),
    #[error("a document named '{0}' already exists")]
    Duplicate(String),
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("document produced no text segments")]
    EmptyDocument,
    #[error("embedding failed: {0}")]
    Provider(#[from] ProviderError),
    #[error("vector index write failed: {0}")]
    IndexWrite(#[from] IndexError),
    #[error("embedding engine is not initialized")]
    EngineUnavailable,
    #[error("ingestion stopped before the document was processed")]
    ShutDown,
}

#[derive(Debug, Clone, Error)]
pub enum InitializationError {
    #[error("could not create embedding provider: {0}")]
    Provider(String),
    #[error("embedding model is unavailable: {0}")]
    Probe(#[from] ProviderError),
    #[error("could not open vector index: {0}")]
    Index(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("snapshot I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
