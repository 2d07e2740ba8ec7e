//! JSON snapshot of collections and READY documents.
//!
//! The snapshot is rewritten in full after every mutation. Only READY
//! documents are kept: anything still PENDING or INDEXING at exit (and
//! anything that failed) is dropped and must be added again.
//!
//! Writes go to a sibling temp file that is then renamed over the
//! snapshot, so a crash mid-write leaves the previous snapshot intact.
//! Save failures are logged and swallowed; the in-memory mutation that
//! triggered them is not rolled back.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use kb_harness_core::models::{
    Collection, Document, DocumentStatus, DEFAULT_COLLECTION_NAME,
};

use crate::error::PersistenceError;
use crate::registry::Registry;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    #[serde(default)]
    collections: Vec<Collection>,
    #[serde(default)]
    documents: Vec<DocumentRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DocumentRecord {
    file_name: String,
    file_path: String,
    #[serde(default)]
    collection_id: Option<String>,
    status: DocumentStatus,
    #[serde(default)]
    segment_ids: Vec<String>,
}

/// State reconstructed from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedState {
    pub collections: Vec<Collection>,
    pub documents: Vec<Document>,
}

pub struct MetadataStore {
    path: PathBuf,
    /// Serializes snapshot-then-write so the newest state always lands last.
    write_lock: Mutex<()>,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing or unreadable file yields empty state.
    /// The result always contains at least the default collection, and every
    /// document belongs to one of the returned collections.
    pub fn load(&self) -> LoadedState {
        let snapshot = match std::fs::read(&self.path) {
            Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(s) => s,
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "corrupt snapshot; starting empty");
                    Snapshot::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "unreadable snapshot; starting empty");
                Snapshot::default()
            }
        };
        normalize(snapshot)
    }

    /// Write `collections` and the READY subset of `documents`.
    pub fn save(
        &self,
        collections: &[Collection],
        documents: &[Document],
    ) -> Result<(), PersistenceError> {
        let snapshot = Snapshot {
            collections: collections.to_vec(),
            documents: documents
                .iter()
                .filter(|d| d.status == DocumentStatus::Ready)
                .map(|d| DocumentRecord {
                    file_name: d.file_name.clone(),
                    file_path: d.file_path.clone(),
                    collection_id: Some(d.collection_id.clone()),
                    status: d.status,
                    segment_ids: d.segment_ids.clone(),
                })
                .collect(),
            saved_at: Some(Utc::now()),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;

        let io_err = |source| PersistenceError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        debug!(path = %self.path.display(), collections = collections.len(), "saved snapshot");
        Ok(())
    }

    /// Save the registry's current state, logging rather than returning
    /// any failure.
    pub fn persist(&self, registry: &Registry) {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (collections, documents) = registry.snapshot();
        if let Err(e) = self.save(&collections, &documents) {
            warn!(error = %e, "failed to persist knowledge base metadata");
        }
    }

    /// [`persist`](Self::persist) on the blocking thread pool, for callers
    /// running on async worker tasks.
    pub async fn persist_blocking(self: Arc<Self>, registry: Arc<Registry>) {
        let result = tokio::task::spawn_blocking(move || self.persist(&registry)).await;
        if let Err(e) = result {
            warn!(error = %e, "snapshot task did not complete");
        }
    }
}

fn normalize(snapshot: Snapshot) -> LoadedState {
    let mut collections = snapshot.collections;
    let mut default_id = collections
        .iter()
        .find(|c| c.name == DEFAULT_COLLECTION_NAME)
        .map(|c| c.id.clone());
    if collections.is_empty() {
        let general = Collection::new(DEFAULT_COLLECTION_NAME);
        default_id = Some(general.id.clone());
        collections.push(general);
    }

    let known: HashSet<String> = collections.iter().map(|c| c.id.clone()).collect();
    let mut seen = HashSet::new();
    let mut documents = Vec::new();
    for record in snapshot.documents {
        if record.status != DocumentStatus::Ready || !seen.insert(record.file_name.clone()) {
            continue;
        }
        let collection_id = match record.collection_id {
            Some(id) if known.contains(&id) => id,
            _ => {
                let id = match &default_id {
                    Some(id) => id.clone(),
                    None => {
                        let general = Collection::new(DEFAULT_COLLECTION_NAME);
                        let id = general.id.clone();
                        collections.push(general);
                        default_id = Some(id.clone());
                        id
                    }
                };
                debug!(file = %record.file_name, "migrated orphaned document to default collection");
                id
            }
        };
        documents.push(Document {
            file_name: record.file_name,
            file_path: record.file_path,
            collection_id,
            status: DocumentStatus::Ready,
            progress: Some(1.0),
            error_message: None,
            segment_ids: record.segment_ids,
        });
    }

    LoadedState {
        collections,
        documents,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ready(name: &str, collection_id: &str) -> Document {
        let mut doc = Document::pending(name, format!("/docs/{name}"), collection_id);
        doc.status = DocumentStatus::Ready;
        doc.progress = Some(1.0);
        doc.segment_ids = vec![format!("{name}-0")];
        doc
    }

    #[test]
    fn missing_file_yields_default_collection() {
        let tmp = TempDir::new().unwrap();
        let state = MetadataStore::new(tmp.path().join("kb.json")).load();
        assert_eq!(state.collections.len(), 1);
        assert_eq!(state.collections[0].name, DEFAULT_COLLECTION_NAME);
        assert!(state.documents.is_empty());
    }

    #[test]
    fn corrupt_file_is_treated_as_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kb.json");
        std::fs::write(&path, b"{ not json").unwrap();
        let state = MetadataStore::new(&path).load();
        assert_eq!(state.collections.len(), 1);
        assert!(state.documents.is_empty());
    }

    #[test]
    fn round_trip_keeps_only_ready_documents() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::new(tmp.path().join("kb.json"));
        let manuals = Collection::new("Manuals");
        let mut pending = Document::pending("draft.md", "/docs/draft.md", &manuals.id);
        pending.status = DocumentStatus::Indexing;
        let docs = vec![ready("guide.pdf", &manuals.id), pending];

        store.save(&[manuals.clone()], &docs).unwrap();
        let state = store.load();
        assert_eq!(state.collections, vec![manuals.clone()]);
        assert_eq!(state.documents, vec![ready("guide.pdf", &manuals.id)]);
    }

    #[test]
    fn orphans_migrate_to_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("kb.json");
        let json = r#"{
            "collections": [{"id": "c1", "name": "Work"}],
            "documents": [
                {"fileName": "a.txt", "filePath": "/a.txt", "collectionId": "", "status": "READY"},
                {"fileName": "b.txt", "filePath": "/b.txt", "status": "READY"},
                {"fileName": "c.txt", "filePath": "/c.txt", "collectionId": "c1", "status": "READY"}
            ]
        }"#;
        std::fs::write(&path, json).unwrap();

        let state = MetadataStore::new(&path).load();
        assert_eq!(state.collections.len(), 2);
        let general = state
            .collections
            .iter()
            .find(|c| c.name == DEFAULT_COLLECTION_NAME)
            .unwrap();
        let owners: Vec<&str> = state
            .documents
            .iter()
            .map(|d| d.collection_id.as_str())
            .collect();
        assert_eq!(owners, vec![general.id.as_str(), general.id.as_str(), "c1"]);
        // Older snapshots carry no segment ids.
        assert!(state.documents[0].segment_ids.is_empty());
    }

    #[tokio::test]
    async fn persist_blocking_writes_registry_state() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(MetadataStore::new(tmp.path().join("kb.json")));
        let manuals = Collection::new("Manuals");
        let registry = Arc::new(Registry::restore(
            vec![manuals.clone()],
            vec![ready("guide.pdf", &manuals.id)],
        ));

        store.clone().persist_blocking(registry).await;
        let state = store.load();
        assert_eq!(state.collections, vec![manuals.clone()]);
        assert_eq!(state.documents, vec![ready("guide.pdf", &manuals.id)]);
    }

    #[test]
    fn save_into_unwritable_location_fails() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let store = MetadataStore::new(blocker.join("kb.json"));
        let err = store.save(&[Collection::new("A")], &[]).unwrap_err();
        assert!(matches!(err, PersistenceError::Io { .. }));
    }
}
