// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Change notifications pushed by a store to real-time listeners.
//!
//! A listener receives a [`Snapshot`] per delivery: the full current result
//! set for its query plus the document changes that triggered it. The first
//! delivery after attaching is the initial snapshot, with every matching
//! document reported as [`ChangeKind::Added`].
//!
//! ```text
//! store write ──► ChangeEvent::Changed ──► listener task re-evaluates query
//!                                                │
//!                                                ▼
//!                                   Snapshot { documents, changes }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::document::Document;
use crate::storage::StorageError;

/// Kind of change to a single document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Removed => "removed",
        }
    }
}

/// One document change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub document: Document,
}

impl DocumentChange {
    pub fn added(document: Document) -> Self {
        Self { kind: ChangeKind::Added, document }
    }

    pub fn modified(document: Document) -> Self {
        Self { kind: ChangeKind::Modified, document }
    }

    pub fn removed(document: Document) -> Self {
        Self { kind: ChangeKind::Removed, document }
    }
}

/// A delivery to a listener
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub collection: String,
    /// Current query result
    pub documents: Vec<Document>,
    /// Changes since the previous delivery
    pub changes: Vec<DocumentChange>,
    /// True for the first delivery after attaching
    pub initial: bool,
}

impl Snapshot {
    /// Initial delivery: every document reported as added.
    pub fn initial(collection: impl Into<String>, documents: Vec<Document>) -> Self {
        let changes = documents.iter().cloned().map(DocumentChange::added).collect();
        Self {
            collection: collection.into(),
            documents,
            changes,
            initial: true,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Receiving half of a listener attachment. Errors are delivered in-band;
/// the channel closing means the store detached the listener.
pub type ChangeStream = mpsc::Receiver<Result<Snapshot, StorageError>>;

/// Store-internal change notification fanned out to listener tasks.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    Changed(DocumentChange),
    /// Push channel failure affecting every listener on `collection`
    Fault { collection: String, error: StorageError },
}

impl ChangeEvent {
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            ChangeEvent::Changed(change) => &change.document.collection,
            ChangeEvent::Fault { collection, .. } => collection,
        }
    }
}
