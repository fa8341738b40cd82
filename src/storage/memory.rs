use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use super::traits::{DocumentPatch, DocumentStore, StorageError, WriteOp, WriteResult};
use crate::document::Document;
use crate::query::{apply_query, QueryOptions};
use crate::realtime::{ChangeEvent, ChangeStream, DocumentChange, Snapshot};

/// Max ops per atomic batch, same limit the hosted backend enforces.
pub const MAX_BATCH_SIZE: usize = 500;

const CHANGE_CHANNEL_CAPACITY: usize = 1024;
const LISTENER_BUFFER: usize = 64;

type Key = (String, String);

struct Inner {
    data: DashMap<Key, Document>,
    /// Serializes writers so version checks and batches are atomic
    write_lock: Mutex<()>,
    changes: broadcast::Sender<ChangeEvent>,
}

/// In-process document store with real-time listeners.
///
/// Used by tests and the demo; behaves like the hosted backend for
/// versioning, batch atomicity and listener snapshots. Cloning is cheap and
/// shares the same data.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                data: DashMap::new(),
                write_lock: Mutex::new(()),
                changes,
            }),
        }
    }

    /// Get current document count (all collections)
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// Count documents in one collection, soft-deleted included
    #[must_use]
    pub fn collection_len(&self, collection: &str) -> usize {
        self.inner.data.iter().filter(|e| e.key().0 == collection).count()
    }

    /// Clear all documents
    pub fn clear(&self) {
        self.inner.data.clear();
    }

    /// Push a listener failure to every listener attached to `collection`.
    pub fn inject_listen_error(&self, collection: &str, error: StorageError) {
        let _ = self.inner.changes.send(ChangeEvent::Fault {
            collection: collection.to_string(),
            error,
        });
    }

    fn collection_docs(inner: &Inner, collection: &str) -> Vec<Document> {
        inner
            .data
            .iter()
            .filter(|e| e.key().0 == collection)
            .map(|e| e.value().clone())
            .collect()
    }

    fn publish(&self, change: DocumentChange) {
        // No receivers just means nobody is listening
        let _ = self.inner.changes.send(ChangeEvent::Changed(change));
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn key(collection: &str, id: &str) -> Key {
    (collection.to_string(), id.to_string())
}

fn apply_patch(mut doc: Document, patch: &DocumentPatch) -> Result<Document, StorageError> {
    if let Some(expected) = patch.expected_version {
        if expected != doc.version {
            return Err(StorageError::Conflict {
                collection: doc.collection,
                id: doc.id,
                expected,
                actual: doc.version,
            });
        }
    }
    for (name, value) in &patch.fields {
        doc.fields.insert(name.clone(), value.clone());
    }
    doc.version += 1;
    doc.updated_at = patch.updated_at;
    if patch.updated_by.is_some() {
        doc.updated_by = patch.updated_by.clone();
    }
    if let Some(at) = patch.delete_marker {
        doc.deleted = true;
        doc.deleted_at = Some(at);
    }
    Ok(doc)
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StorageError> {
        Ok(self.inner.data.get(&key(collection, id)).map(|r| r.value().clone()))
    }

    async fn query(&self, collection: &str, query: &QueryOptions) -> Result<Vec<Document>, StorageError> {
        apply_query(Self::collection_docs(&self.inner, collection), query)
    }

    async fn insert(&self, doc: &Document) -> Result<Document, StorageError> {
        {
            let _guard = self.inner.write_lock.lock();
            let k = key(&doc.collection, &doc.id);
            if self.inner.data.contains_key(&k) {
                return Err(StorageError::AlreadyExists {
                    collection: doc.collection.clone(),
                    id: doc.id.clone(),
                });
            }
            self.inner.data.insert(k, doc.clone());
        }
        self.publish(DocumentChange::added(doc.clone()));
        Ok(doc.clone())
    }

    async fn update(&self, collection: &str, id: &str, patch: &DocumentPatch) -> Result<Document, StorageError> {
        let updated = {
            let _guard = self.inner.write_lock.lock();
            let k = key(collection, id);
            let current = self
                .inner
                .data
                .get(&k)
                .map(|r| r.value().clone())
                .ok_or_else(|| StorageError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })?;
            let updated = apply_patch(current, patch)?;
            self.inner.data.insert(k, updated.clone());
            updated
        };
        self.publish(DocumentChange::modified(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StorageError> {
        let removed = {
            let _guard = self.inner.write_lock.lock();
            self.inner.data.remove(&key(collection, id))
        };
        if let Some((_, doc)) = removed {
            self.publish(DocumentChange::removed(doc));
        }
        Ok(())
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<WriteResult, StorageError> {
        if ops.len() > MAX_BATCH_SIZE {
            return Err(StorageError::InvalidArgument(format!(
                "batch of {} operations exceeds limit of {}",
                ops.len(),
                MAX_BATCH_SIZE
            )));
        }

        let mut events = Vec::with_capacity(ops.len());
        let result = {
            let _guard = self.inner.write_lock.lock();

            // Stage every op against a private view; nothing touches `data`
            // until the whole batch has validated.
            let mut staged: HashMap<Key, Option<Document>> = HashMap::new();
            let lookup = |staged: &HashMap<Key, Option<Document>>, k: &Key| -> Option<Document> {
                match staged.get(k) {
                    Some(entry) => entry.clone(),
                    None => self.inner.data.get(k).map(|r| r.value().clone()),
                }
            };

            for op in &ops {
                match op {
                    WriteOp::Insert(doc) => {
                        let k = key(&doc.collection, &doc.id);
                        if lookup(&staged, &k).is_some() {
                            return Err(StorageError::AlreadyExists {
                                collection: doc.collection.clone(),
                                id: doc.id.clone(),
                            });
                        }
                        staged.insert(k, Some(doc.clone()));
                        events.push(DocumentChange::added(doc.clone()));
                    }
                    WriteOp::Update { collection, id, patch } => {
                        let k = key(collection, id);
                        let current = lookup(&staged, &k).ok_or_else(|| StorageError::NotFound {
                            collection: collection.clone(),
                            id: id.clone(),
                        })?;
                        let updated = apply_patch(current, patch)?;
                        staged.insert(k, Some(updated.clone()));
                        events.push(DocumentChange::modified(updated));
                    }
                    WriteOp::Delete { collection, id } => {
                        let k = key(collection, id);
                        if let Some(existing) = lookup(&staged, &k) {
                            events.push(DocumentChange::removed(existing));
                        }
                        staged.insert(k, None);
                    }
                }
            }

            let mut written = Vec::new();
            let mut deleted = 0;
            for (k, entry) in staged {
                match entry {
                    Some(doc) => {
                        written.push(doc.clone());
                        self.inner.data.insert(k, doc);
                    }
                    None => {
                        if self.inner.data.remove(&k).is_some() {
                            deleted += 1;
                        }
                    }
                }
            }
            written.sort_by(|a, b| (&a.collection, &a.id).cmp(&(&b.collection, &b.id)));
            WriteResult { written, deleted }
        };

        for change in events {
            self.publish(change);
        }
        Ok(result)
    }

    async fn listen(&self, collection: &str, query: &QueryOptions) -> Result<ChangeStream, StorageError> {
        // Subscribe before reading so no write slips between snapshot and stream
        let mut events = self.inner.changes.subscribe();
        let initial = apply_query(Self::collection_docs(&self.inner, collection), query)?;

        let (tx, rx) = mpsc::channel(LISTENER_BUFFER);
        let mut previous: HashMap<String, Document> =
            initial.iter().map(|d| (d.id.clone(), d.clone())).collect();
        let _ = tx.try_send(Ok(Snapshot::initial(collection, initial)));

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let collection = collection.to_string();
        let query = query.clone();
        debug!(collection = %collection, "Listener attached");

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = tx.closed() => break,
                    event = events.recv() => event,
                };
                match event {
                    Ok(event) if event.collection() != collection => continue,
                    Ok(ChangeEvent::Fault { error, .. }) => {
                        if tx.send(Err(error)).await.is_err() {
                            break;
                        }
                    }
                    Ok(ChangeEvent::Changed(_)) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let Some(inner) = weak.upgrade() else { break };
                        let docs = match apply_query(InMemoryStore::collection_docs(&inner, &collection), &query) {
                            Ok(docs) => docs,
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                break;
                            }
                        };
                        drop(inner);

                        let changes = diff(&mut previous, &docs);
                        if changes.is_empty() {
                            continue;
                        }
                        let snapshot = Snapshot {
                            collection: collection.clone(),
                            documents: docs,
                            changes,
                            initial: false,
                        };
                        if tx.send(Ok(snapshot)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!(collection = %collection, "Listener detached");
        });

        Ok(rx)
    }
}

/// Changes between the previously delivered result and `current`, updating
/// `previous` in place.
fn diff(previous: &mut HashMap<String, Document>, current: &[Document]) -> Vec<DocumentChange> {
    let mut changes = Vec::new();
    let mut next = HashMap::with_capacity(current.len());

    for doc in current {
        match previous.remove(&doc.id) {
            None => changes.push(DocumentChange::added(doc.clone())),
            Some(old) if old != *doc => changes.push(DocumentChange::modified(doc.clone())),
            Some(_) => {}
        }
        next.insert(doc.id.clone(), doc.clone());
    }
    let mut removed: Vec<Document> = previous.drain().map(|(_, d)| d).collect();
    removed.sort_by(|a, b| a.id.cmp(&b.id));
    changes.extend(removed.into_iter().map(DocumentChange::removed));

    *previous = next;
    changes
}
