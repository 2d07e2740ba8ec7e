//! Core data models for the knowledge base.
//!
//! These types represent the collections, documents, segments, and
//! retrieval results that flow through the ingestion and retrieval pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name of the collection created on first run and used for orphaned documents.
pub const DEFAULT_COLLECTION_NAME: &str = "General";

/// Metadata keys carried by every vector index payload.
pub mod keys {
    pub const FILE_NAME: &str = "file_name";
    pub const FILE_PATH: &str = "file_path";
    pub const SEGMENT_INDEX: &str = "segment_index";
    pub const COLLECTION_ID: &str = "collection_id";
    pub const PAGE_NUMBER: &str = "page_number";
}

/// A named grouping of documents used to scope retrieval.
///
/// Names are mutable and not required to be unique; the id is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
}

impl Collection {
    /// Create a collection with a freshly generated id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
        }
    }
}

/// File formats accepted for ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Text,
    Markdown,
    Pdf,
}

impl FileFormat {
    /// Detect the format from a file name's extension (case-insensitive).
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        let (_, ext) = file_name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "txt" => Some(Self::Text),
            "md" => Some(Self::Markdown),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    /// Extension of a file name, lowercased, or an empty string.
    pub fn extension_of(file_name: &str) -> String {
        file_name
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default()
    }
}

/// Ingestion state of a [`Document`].
///
/// Transitions are one-way: `Pending -> Indexing -> Ready | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Indexing,
    Ready,
    Error,
}

impl DocumentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Error)
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Staying in `Indexing` is allowed so progress can be reported.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Indexing)
                | (Self::Indexing, Self::Indexing)
                | (Self::Indexing, Self::Ready)
                | (Self::Indexing, Self::Error)
        )
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Indexing => "INDEXING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// A user-supplied file tracked through ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub file_name: String,
    pub file_path: String,
    pub collection_id: String,
    pub status: DocumentStatus,
    /// `None` while progress is indeterminate; otherwise in `[0, 1]`.
    pub progress: Option<f32>,
    pub error_message: Option<String>,
    /// Vector index ids written for this document, used to purge on delete.
    pub segment_ids: Vec<String>,
}

impl Document {
    /// A freshly added document awaiting ingestion.
    pub fn pending(
        file_name: impl Into<String>,
        file_path: impl Into<String>,
        collection_id: impl Into<String>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            file_path: file_path.into(),
            collection_id: collection_id.into(),
            status: DocumentStatus::Pending,
            progress: Some(0.0),
            error_message: None,
            segment_ids: Vec::new(),
        }
    }
}

/// One page (or the whole body, for unpaged formats) of parsed text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPage {
    /// 1-based page number; `None` for formats without pages.
    pub number: Option<u32>,
    pub text: String,
}

/// Output of a document parser.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    pub pages: Vec<ParsedPage>,
}

impl ParsedDocument {
    /// A single unpaged body of text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            pages: vec![ParsedPage {
                number: None,
                text: text.into(),
            }],
        }
    }
}

/// Per-segment metadata attached before embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentMetadata {
    pub file_name: String,
    pub file_path: String,
    pub segment_index: usize,
    pub collection_id: String,
    pub page_number: Option<u32>,
}

/// The atomic embeddable unit. Exists only during ingestion; afterwards it
/// lives on solely as a vector index entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    pub metadata: SegmentMetadata,
}

impl Segment {
    /// Flatten into the string map stored alongside the vector.
    pub fn metadata_map(&self) -> BTreeMap<String, String> {
        let m = &self.metadata;
        let mut map = BTreeMap::new();
        map.insert(keys::FILE_NAME.to_string(), m.file_name.clone());
        map.insert(keys::FILE_PATH.to_string(), m.file_path.clone());
        map.insert(keys::SEGMENT_INDEX.to_string(), m.segment_index.to_string());
        map.insert(keys::COLLECTION_ID.to_string(), m.collection_id.clone());
        if let Some(page) = m.page_number {
            map.insert(keys::PAGE_NUMBER.to_string(), page.to_string());
        }
        map
    }
}

/// A passage returned by retrieval. Output-only, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    pub content: String,
    pub file_name: String,
    pub page_number: Option<u32>,
    pub score: f32,
}
