use async_trait::async_trait;
use thiserror::Error;

use crate::document::{Document, Fields};
use crate::query::{Aggregation, AggregateValue, QueryOptions};
use crate::realtime::ChangeStream;

/// Errors reported by a document store backend.
///
/// Mirrors the status codes of the hosted document database: callers
/// branch on the variant, and [`StorageError::is_transient`] decides whether
/// the retry queue gets a second chance at the operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("Document '{collection}/{id}' not found")]
    NotFound { collection: String, id: String },
    #[error("Document '{collection}/{id}' already exists")]
    AlreadyExists { collection: String, id: String },
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Version conflict on '{collection}/{id}': expected {expected}, found {actual}")]
    Conflict {
        collection: String,
        id: String,
        expected: u64,
        actual: u64,
    },
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Deadline exceeded")]
    DeadlineExceeded,
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Failures worth retrying: the request may succeed if sent again.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::Unavailable(_) | StorageError::Network(_) | StorageError::DeadlineExceeded
        )
    }

    /// Short status code for logs and metrics labels
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::NotFound { .. } => "not-found",
            StorageError::AlreadyExists { .. } => "already-exists",
            StorageError::PermissionDenied(_) => "permission-denied",
            StorageError::Conflict { .. } => "aborted",
            StorageError::InvalidArgument(_) => "invalid-argument",
            StorageError::Unavailable(_) => "unavailable",
            StorageError::Network(_) => "network",
            StorageError::DeadlineExceeded => "deadline-exceeded",
            StorageError::Backend(_) => "internal",
        }
    }
}

/// Partial update applied by [`DocumentStore::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPatch {
    /// Fields merged into the document (other fields untouched)
    pub fields: Fields,
    /// Compare-and-swap guard: the stored version must equal this
    pub expected_version: Option<u64>,
    pub updated_at: i64,
    pub updated_by: Option<String>,
    /// Mark as soft-deleted at this timestamp
    pub delete_marker: Option<i64>,
}

/// One member of an atomic batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Insert(Document),
    Update {
        collection: String,
        id: String,
        patch: DocumentPatch,
    },
    Delete { collection: String, id: String },
}

impl WriteOp {
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Insert(doc) => &doc.collection,
            WriteOp::Update { collection, .. } | WriteOp::Delete { collection, .. } => collection,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            WriteOp::Insert(doc) => &doc.id,
            WriteOp::Update { id, .. } | WriteOp::Delete { id, .. } => id,
        }
    }
}

/// Outcome of a committed batch
#[derive(Debug, Clone, PartialEq)]
pub struct WriteResult {
    /// Documents as stored after the commit (deletes omitted)
    pub written: Vec<Document>,
    pub deleted: usize,
}

/// A document database backend.
///
/// Implementations must make `update` an atomic compare-and-swap on
/// `expected_version` and `commit` all-or-nothing.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StorageError>;

    async fn query(&self, collection: &str, query: &QueryOptions) -> Result<Vec<Document>, StorageError>;

    /// Insert a new document. Fails with `AlreadyExists` if the id is taken.
    async fn insert(&self, doc: &Document) -> Result<Document, StorageError>;

    /// Merge `patch` into an existing document and bump its version.
    async fn update(&self, collection: &str, id: &str, patch: &DocumentPatch) -> Result<Document, StorageError>;

    /// Remove a document. Deleting a missing document is not an error.
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StorageError>;

    /// Apply every op or none of them.
    async fn commit(&self, ops: Vec<WriteOp>) -> Result<WriteResult, StorageError>;

    /// Server-side aggregation. Default implementation queries and folds locally.
    async fn aggregate(
        &self,
        collection: &str,
        query: &QueryOptions,
        aggregation: &Aggregation,
    ) -> Result<AggregateValue, StorageError> {
        let docs = self.query(collection, query).await?;
        Ok(aggregation.evaluate(&docs))
    }

    /// Attach a real-time listener for `query` on `collection`.
    async fn listen(&self, collection: &str, query: &QueryOptions) -> Result<ChangeStream, StorageError>;

    /// Cheap liveness probe
    async fn ping(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Allocate a fresh document id
    fn generate_id(&self) -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}
