//! Collection and document registries.
//!
//! Both registries share one lock so that cross-cutting invariants hold
//! atomically: a file name is unique across every collection, and every
//! document belongs to a collection that exists. Workers never touch
//! [`Document`] values directly; they call the transition methods here,
//! which enforce the one-way status machine and publish a
//! [`DocumentEvent`] for every change.
//!
//! Each registration of a file name carries an [`IngestToken`]. Transitions
//! must present the token of the entry they were started for, so a job for a
//! document that was deleted and re-added under the same name cannot touch
//! the new entry.
//!
//! Observers get data out in two ways: [`Registry::subscribe`] for a stream
//! of all changes, and the per-document [`IngestHandle`] returned from
//! [`Registry::insert_document`].

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use kb_harness_core::models::{
    Collection, Document, DocumentStatus, FileFormat, DEFAULT_COLLECTION_NAME,
};

use crate::error::ValidationError;

const EVENT_CAPACITY: usize = 256;

/// A change to a document's registry entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DocumentEvent {
    Changed {
        file_name: String,
        status: DocumentStatus,
        progress: Option<f32>,
        error: Option<String>,
    },
    Removed {
        file_name: String,
    },
}

impl DocumentEvent {
    fn changed(doc: &Document) -> Self {
        Self::Changed {
            file_name: doc.file_name.clone(),
            status: doc.status,
            progress: doc.progress,
            error: doc.error_message.clone(),
        }
    }

    pub fn file_name(&self) -> &str {
        match self {
            Self::Changed { file_name, .. } | Self::Removed { file_name } => file_name,
        }
    }
}

/// Identifies one registration of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IngestToken(Uuid);

impl IngestToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Observes one document from submission to a terminal status.
#[derive(Debug, Clone)]
pub struct IngestHandle {
    file_name: String,
    token: IngestToken,
    rx: watch::Receiver<Option<Document>>,
}

impl IngestHandle {
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn token(&self) -> IngestToken {
        self.token
    }

    /// The latest state, or `None` once the document has been deleted.
    pub fn current(&self) -> Option<Document> {
        self.rx.borrow().clone()
    }

    /// Wait until the document is READY or ERROR. Returns `None` if it is
    /// deleted first.
    pub async fn wait(mut self) -> Option<Document> {
        loop {
            {
                let current = self.rx.borrow_and_update();
                match current.as_ref() {
                    None => return None,
                    Some(doc) if doc.status.is_terminal() => return Some(doc.clone()),
                    Some(_) => {}
                }
            }
            if self.rx.changed().await.is_err() {
                // Sender dropped: the entry is gone.
                return self.rx.borrow().clone().filter(|d| d.status.is_terminal());
            }
        }
    }
}

#[derive(Default)]
struct State {
    collections: Vec<Collection>,
    /// Insertion order is preserved for listing.
    documents: Vec<Document>,
    watchers: HashMap<String, watch::Sender<Option<Document>>>,
    /// Live registrations; restored documents have none.
    tokens: HashMap<String, IngestToken>,
}

impl State {
    fn position(&self, file_name: &str) -> Option<usize> {
        self.documents.iter().position(|d| d.file_name == file_name)
    }

    /// Drop the watcher and token of a removed document.
    fn forget(&mut self, file_name: &str) {
        self.tokens.remove(file_name);
        if let Some(tx) = self.watchers.remove(file_name) {
            tx.send_replace(None);
        }
    }

    fn has_collection(&self, id: &str) -> bool {
        self.collections.iter().any(|c| c.id == id)
    }

    fn default_collection(&mut self) -> (Collection, bool) {
        if let Some(c) = self
            .collections
            .iter()
            .find(|c| c.name == DEFAULT_COLLECTION_NAME)
        {
            return (c.clone(), false);
        }
        let c = Collection::new(DEFAULT_COLLECTION_NAME);
        self.collections.push(c.clone());
        (c, true)
    }
}

pub struct Registry {
    state: RwLock<State>,
    events: broadcast::Sender<DocumentEvent>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(State::default()),
            events,
        }
    }

    /// Build a registry from previously persisted state.
    pub fn restore(collections: Vec<Collection>, documents: Vec<Document>) -> Self {
        let registry = Self::new();
        {
            let mut state = registry.write();
            state.collections = collections;
            state.documents = documents;
        }
        registry
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DocumentEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: DocumentEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    // ---- collections ----

    pub fn collections(&self) -> Vec<Collection> {
        self.read().collections.clone()
    }

    pub fn collection(&self, id: &str) -> Option<Collection> {
        self.read().collections.iter().find(|c| c.id == id).cloned()
    }

    pub fn create_collection(&self, name: &str) -> Collection {
        let collection = Collection::new(name);
        self.write().collections.push(collection.clone());
        collection
    }

    /// Returns `false` if no collection has that id.
    pub fn rename_collection(&self, id: &str, new_name: &str) -> bool {
        let mut state = self.write();
        match state.collections.iter_mut().find(|c| c.id == id) {
            Some(c) => {
                c.name = new_name.to_string();
                true
            }
            None => false,
        }
    }

    /// Remove a collection and every document it owns. Returns the removed
    /// documents so their vectors can be purged.
    pub fn remove_collection(&self, id: &str) -> Option<(Collection, Vec<Document>)> {
        let mut state = self.write();
        let pos = state.collections.iter().position(|c| c.id == id)?;
        let collection = state.collections.remove(pos);

        let (removed, kept): (Vec<Document>, Vec<Document>) = std::mem::take(&mut state.documents)
            .into_iter()
            .partition(|d| d.collection_id == id);
        state.documents = kept;

        for doc in &removed {
            state.forget(&doc.file_name);
            self.publish(DocumentEvent::Removed {
                file_name: doc.file_name.clone(),
            });
        }
        Some((collection, removed))
    }

    /// The collection named "General", created if absent. The flag reports
    /// whether it was created by this call.
    pub fn default_collection(&self) -> (Collection, bool) {
        self.write().default_collection()
    }

    // ---- documents ----

    /// Validate and register a new PENDING document.
    pub fn insert_document(
        &self,
        file_name: &str,
        file_path: &str,
        collection_id: &str,
    ) -> Result<(Document, IngestHandle), ValidationError> {
        if FileFormat::from_file_name(file_name).is_none() {
            return Err(ValidationError::UnsupportedFormat(
                FileFormat::extension_of(file_name),
            ));
        }

        let mut state = self.write();
        if !state.has_collection(collection_id) {
            return Err(ValidationError::UnknownCollection(collection_id.to_string()));
        }
        if state.position(file_name).is_some() {
            return Err(ValidationError::Duplicate(file_name.to_string()));
        }

        let doc = Document::pending(file_name, file_path, collection_id);
        let token = IngestToken::new();
        let (tx, rx) = watch::channel(Some(doc.clone()));
        state.documents.push(doc.clone());
        state.watchers.insert(file_name.to_string(), tx);
        state.tokens.insert(file_name.to_string(), token);
        self.publish(DocumentEvent::changed(&doc));

        Ok((
            doc,
            IngestHandle {
                file_name: file_name.to_string(),
                token,
                rx,
            },
        ))
    }

    pub fn remove_document(&self, file_name: &str) -> Option<Document> {
        let mut state = self.write();
        let pos = state.position(file_name)?;
        let doc = state.documents.remove(pos);
        state.forget(file_name);
        self.publish(DocumentEvent::Removed {
            file_name: file_name.to_string(),
        });
        Some(doc)
    }

    pub fn documents(&self) -> Vec<Document> {
        self.read().documents.clone()
    }

    pub fn documents_in(&self, collection_id: &str) -> Vec<Document> {
        self.read()
            .documents
            .iter()
            .filter(|d| d.collection_id == collection_id)
            .cloned()
            .collect()
    }

    pub fn document(&self, file_name: &str) -> Option<Document> {
        let state = self.read();
        state.position(file_name).map(|i| state.documents[i].clone())
    }

    pub fn ready_count(&self) -> usize {
        self.read()
            .documents
            .iter()
            .filter(|d| d.status == DocumentStatus::Ready)
            .count()
    }

    /// Collections and documents as one consistent view, for persistence.
    pub fn snapshot(&self) -> (Vec<Collection>, Vec<Document>) {
        let state = self.read();
        (state.collections.clone(), state.documents.clone())
    }

    // ---- status transitions (called by the ingestion pipeline) ----

    /// Apply `update` if the registration identified by `token` still
    /// exists and may move to `next`. Returns the updated document, or
    /// `None` if it was deleted (or replaced) or the transition is not
    /// allowed.
    fn transition(
        &self,
        file_name: &str,
        token: IngestToken,
        next: DocumentStatus,
        update: impl FnOnce(&mut Document),
    ) -> Option<Document> {
        let mut state = self.write();
        if state.tokens.get(file_name) != Some(&token) {
            debug!(file = file_name, "ignoring update for a removed registration");
            return None;
        }
        let pos = state.position(file_name)?;
        let doc = &mut state.documents[pos];
        if !doc.status.can_transition_to(next) {
            warn!(
                file = file_name,
                from = %doc.status,
                to = %next,
                "rejected document status transition"
            );
            return None;
        }
        doc.status = next;
        update(doc);
        let doc = doc.clone();

        if let Some(tx) = state.watchers.get(file_name) {
            tx.send_replace(Some(doc.clone()));
        }
        if next.is_terminal() {
            state.watchers.remove(file_name);
        }
        self.publish(DocumentEvent::changed(&doc));
        Some(doc)
    }

    /// PENDING -> INDEXING with indeterminate progress.
    pub fn begin_indexing(&self, file_name: &str, token: IngestToken) -> Option<Document> {
        self.transition(file_name, token, DocumentStatus::Indexing, |d| {
            d.progress = None
        })
    }

    /// Report progress while INDEXING.
    pub fn report_progress(
        &self,
        file_name: &str,
        token: IngestToken,
        progress: f32,
    ) -> Option<Document> {
        self.transition(file_name, token, DocumentStatus::Indexing, |d| {
            d.progress = Some(progress.clamp(0.0, 1.0))
        })
    }

    pub fn mark_ready(
        &self,
        file_name: &str,
        token: IngestToken,
        segment_ids: Vec<String>,
    ) -> Option<Document> {
        self.transition(file_name, token, DocumentStatus::Ready, |d| {
            d.progress = Some(1.0);
            d.error_message = None;
            d.segment_ids = segment_ids;
        })
    }

    pub fn mark_error(
        &self,
        file_name: &str,
        token: IngestToken,
        message: String,
    ) -> Option<Document> {
        self.transition(file_name, token, DocumentStatus::Error, |d| {
            d.error_message = Some(message);
        })
    }

    /// Fail every document that has not reached a terminal status. Used
    /// when the worker pool is torn down with work outstanding.
    pub fn fail_unfinished(&self, message: &str) -> usize {
        let pending: Vec<(String, IngestToken, DocumentStatus)> = {
            let state = self.read();
            state
                .documents
                .iter()
                .filter(|d| !d.status.is_terminal())
                .filter_map(|d| {
                    let token = state.tokens.get(&d.file_name)?;
                    Some((d.file_name.clone(), *token, d.status))
                })
                .collect()
        };

        let mut failed = 0;
        for (name, token, status) in pending {
            if status == DocumentStatus::Pending && self.begin_indexing(&name, token).is_none() {
                continue;
            }
            if self.mark_error(&name, token, message.to_string()).is_some() {
                failed += 1;
            }
        }
        failed
    }
}
