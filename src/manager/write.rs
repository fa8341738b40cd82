//! Write API: create, update, delete and atomic batches.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::types::{BatchOperation, BatchResult, DeleteOptions, WriteOptions};
use super::DataManager;
use crate::access::{Action, Principal};
use crate::activity::{ActivityAction, ActivityEntry};
use crate::document::{now_millis, Document, Fields};
use crate::error::DataError;
use crate::metrics;
use crate::sanitize::{FieldError, FieldType, ValidationError, WriteMode};
use crate::storage::{DocumentPatch, WriteOp};

impl DataManager {
    // ═══════════════════════════════════════════════════════════════════════════
    // Single-document writes
    // ═══════════════════════════════════════════════════════════════════════════

    /// Create a document.
    ///
    /// Fields are sanitized and validated against the collection schema
    /// first; a validation failure never reaches the store. Missing fields
    /// with a default (lead `status` → `newLead`) are filled in. The id is
    /// `options.id` or a fresh store id.
    #[tracing::instrument(skip(self, data, options), fields(collection = %collection))]
    pub async fn create(
        &self,
        collection: &str,
        data: Fields,
        options: WriteOptions,
    ) -> Result<Document, DataError> {
        let _timer = crate::time_operation!(collection, "create");
        let result = self.create_inner(collection, data, options).await;
        self.finish(collection, "create", result)
    }

    async fn create_inner(
        &self,
        collection: &str,
        data: Fields,
        options: WriteOptions,
    ) -> Result<Document, DataError> {
        let principal = self.principal()?;
        let doc = self.prepare_insert(&principal, collection, data, options.id.as_deref())?;

        let store = Arc::clone(&self.store);
        let pending = doc.clone();
        let stored = self
            .execute("create", collection, options.retry, move || {
                let (store, doc) = (Arc::clone(&store), pending.clone());
                async move { store.insert(&doc).await }
            })
            .await?;

        let dropped = self.cache.invalidate(collection, Some(&stored.id));
        debug!(id = %stored.id, invalidated = dropped, "Document created");
        self.activity.log(
            ActivityEntry::new(ActivityAction::Create, collection)
                .document(&stored.id)
                .actor(principal.uid())
                .fields(&stored.fields),
        );
        Ok(stored)
    }

    /// Merge `data` into an existing document.
    ///
    /// With `options.expected_version` set the update only applies if the
    /// stored version still matches; otherwise it fails with
    /// [`DataError::Conflict`] and nothing is written.
    #[tracing::instrument(skip(self, data, options), fields(collection = %collection, id = %id))]
    pub async fn update(
        &self,
        collection: &str,
        id: &str,
        data: Fields,
        options: WriteOptions,
    ) -> Result<Document, DataError> {
        let _timer = crate::time_operation!(collection, "update");
        let result = self.update_inner(collection, id, data, options).await;
        self.finish(collection, "update", result)
    }

    async fn update_inner(
        &self,
        collection: &str,
        id: &str,
        data: Fields,
        options: WriteOptions,
    ) -> Result<Document, DataError> {
        let principal = self.principal()?;
        let fields = self.sanitize_write(&principal, collection, &data, WriteMode::Update)?;
        self.authorize_existing(&principal, Action::Update, collection, id, Some(&fields), options.retry)
            .await?;

        let entry = ActivityEntry::new(ActivityAction::Update, collection)
            .document(id)
            .actor(principal.uid())
            .fields(&fields);
        let patch = DocumentPatch {
            fields,
            expected_version: options.expected_version,
            updated_at: now_millis(),
            updated_by: principal.uid().map(str::to_string),
            delete_marker: None,
        };
        let updated = self.apply_patch("update", collection, id, patch, options.retry).await?;

        self.cache.invalidate(collection, Some(id));
        self.activity.log(entry);
        Ok(updated)
    }

    /// Delete a document, or flag it deleted with [`DeleteOptions::soft`].
    ///
    /// Soft-deleted documents stay in the store (with `deleted` and
    /// `deletedAt` set) and are hidden from reads unless the query asks for
    /// them. Hard-deleting a missing document is not an error.
    #[tracing::instrument(skip(self, options), fields(collection = %collection, id = %id, soft = options.soft_delete))]
    pub async fn delete(&self, collection: &str, id: &str, options: DeleteOptions) -> Result<(), DataError> {
        let _timer = crate::time_operation!(collection, "delete");
        let result = self.delete_inner(collection, id, options).await;
        self.finish(collection, "delete", result)
    }

    async fn delete_inner(&self, collection: &str, id: &str, options: DeleteOptions) -> Result<(), DataError> {
        let principal = self.principal()?;
        let existing = self
            .authorize_existing(&principal, Action::Delete, collection, id, None, options.retry)
            .await?;

        let action = if options.soft_delete {
            let now = now_millis();
            let patch = DocumentPatch {
                fields: Fields::new(),
                expected_version: options.expected_version,
                updated_at: now,
                updated_by: principal.uid().map(str::to_string),
                delete_marker: Some(now),
            };
            self.apply_patch("soft_delete", collection, id, patch, options.retry).await?;
            ActivityAction::SoftDelete
        } else {
            if let Some(expected) = options.expected_version {
                let current = match existing {
                    Some(doc) => Some(doc),
                    None => self.fetch_raw(collection, id, options.retry).await?,
                };
                if let Some(doc) = current.filter(|d| d.version != expected) {
                    return Err(DataError::Conflict {
                        collection: collection.to_string(),
                        id: id.to_string(),
                        expected,
                        actual: doc.version,
                    });
                }
            }
            let store = Arc::clone(&self.store);
            let (c, i) = (collection.to_string(), id.to_string());
            self.execute("delete", collection, options.retry, move || {
                let (store, c, i) = (Arc::clone(&store), c.clone(), i.clone());
                async move { store.delete(&c, &i).await }
            })
            .await?;
            ActivityAction::Delete
        };

        self.cache.invalidate(collection, Some(id));
        self.activity.log(
            ActivityEntry::new(action, collection)
                .document(id)
                .actor(principal.uid()),
        );
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Batches
    // ═══════════════════════════════════════════════════════════════════════════

    /// Apply every operation atomically, or none of them.
    ///
    /// All operations are sanitized and authorized before anything is sent;
    /// validation errors from every member are reported together, with field
    /// names prefixed by the operation index (`"2.phone"`).
    #[tracing::instrument(skip(self, operations), fields(count = operations.len()))]
    pub async fn batch_write(&self, operations: Vec<BatchOperation>) -> Result<BatchResult, DataError> {
        let label = operations.first().map(|op| op.collection().to_string()).unwrap_or_default();
        let _timer = crate::time_operation!(&label, "batch_write");
        let result = self.batch_inner(operations).await;
        self.finish(&label, "batch_write", result)
    }

    async fn batch_inner(&self, operations: Vec<BatchOperation>) -> Result<BatchResult, DataError> {
        let principal = self.principal()?;
        let total = operations.len();
        if total == 0 {
            return Ok(BatchResult {
                total: 0,
                documents: Vec::new(),
                deleted: 0,
            });
        }

        let mut ops = Vec::with_capacity(total);
        let mut entries = Vec::with_capacity(total);
        let mut errors = Vec::new();

        for (index, operation) in operations.into_iter().enumerate() {
            match self.prepare_batch_op(&principal, operation).await {
                Ok((op, entry)) => {
                    ops.push(op);
                    entries.push(entry);
                }
                Err(DataError::Validation(e)) => {
                    errors.extend(
                        e.errors
                            .into_iter()
                            .map(|f| FieldError::new(format!("{}.{}", index, f.field), f.message)),
                    );
                }
                Err(e) => return Err(e),
            }
        }
        if !errors.is_empty() {
            return Err(ValidationError { errors }.into());
        }

        metrics::record_batch_size(total);
        let touched: BTreeSet<(String, String)> = ops
            .iter()
            .map(|op| (op.collection().to_string(), op.id().to_string()))
            .collect();

        let store = Arc::clone(&self.store);
        let label = ops.first().map(|op| op.collection().to_string()).unwrap_or_default();
        let result = self
            .execute("batch_write", &label, true, move || {
                let (store, ops) = (Arc::clone(&store), ops.clone());
                async move { store.commit(ops).await }
            })
            .await?;

        for (collection, id) in &touched {
            self.cache.invalidate(collection, Some(id));
        }
        for entry in entries {
            self.activity.log(entry.actor(principal.uid()));
        }
        info!(total, written = result.written.len(), deleted = result.deleted, "Batch committed");

        Ok(BatchResult {
            total,
            documents: result.written,
            deleted: result.deleted,
        })
    }

    async fn prepare_batch_op(
        &self,
        principal: &Principal,
        operation: BatchOperation,
    ) -> Result<(WriteOp, ActivityEntry), DataError> {
        match operation {
            BatchOperation::Create { collection, id, data } => {
                let doc = self.prepare_insert(principal, &collection, data, id.as_deref())?;
                let entry = ActivityEntry::new(ActivityAction::BatchWrite, &collection)
                    .document(&doc.id)
                    .fields(&doc.fields);
                Ok((WriteOp::Insert(doc), entry))
            }
            BatchOperation::Update {
                collection,
                id,
                data,
                expected_version,
            } => {
                let fields = self.sanitize_write(principal, &collection, &data, WriteMode::Update)?;
                self.authorize_existing(principal, Action::Update, &collection, &id, Some(&fields), true)
                    .await?;
                let entry = ActivityEntry::new(ActivityAction::BatchWrite, &collection)
                    .document(&id)
                    .fields(&fields);
                let patch = DocumentPatch {
                    fields,
                    expected_version,
                    updated_at: now_millis(),
                    updated_by: principal.uid().map(str::to_string),
                    delete_marker: None,
                };
                Ok((WriteOp::Update { collection, id, patch }, entry))
            }
            BatchOperation::Delete {
                collection,
                id,
                soft_delete,
            } => {
                self.authorize_existing(principal, Action::Delete, &collection, &id, None, true)
                    .await?;
                let entry = ActivityEntry::new(ActivityAction::BatchWrite, &collection).document(&id);
                let op = if soft_delete {
                    let now = now_millis();
                    WriteOp::Update {
                        collection,
                        id,
                        patch: DocumentPatch {
                            updated_at: now,
                            updated_by: principal.uid().map(str::to_string),
                            delete_marker: Some(now),
                            ..Default::default()
                        },
                    }
                } else {
                    WriteOp::Delete { collection, id }
                };
                Ok((op, entry))
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════════

    /// Sanitize, validate and authorize a new document.
    fn prepare_insert(
        &self,
        principal: &Principal,
        collection: &str,
        mut data: Fields,
        id: Option<&str>,
    ) -> Result<Document, DataError> {
        self.policy.stamp_ownership(principal, collection, &mut data);
        let fields = self.sanitize_write(principal, collection, &data, WriteMode::Create)?;
        self.policy.check(principal, Action::Create, collection, None, Some(&fields))?;

        let id = match id {
            Some(raw) => self
                .sanitizer
                .clean("id", raw, FieldType::Id, true)
                .map_err(|e| self.reject(principal, collection, ValidationError::single(e)))?,
            None => self.store.generate_id(),
        };

        let mut doc = Document::new(collection, id, fields);
        doc.created_by = principal.uid().map(str::to_string);
        doc.updated_by = doc.created_by.clone();
        Ok(doc)
    }

    fn sanitize_write(
        &self,
        principal: &Principal,
        collection: &str,
        data: &Fields,
        mode: WriteMode,
    ) -> Result<Fields, DataError> {
        self.sanitizer
            .sanitize_fields(collection, data, mode)
            .map_err(|e| self.reject(principal, collection, e))
    }

    /// Record a validation failure and turn it into the caller's error.
    fn reject(&self, principal: &Principal, collection: &str, error: ValidationError) -> DataError {
        metrics::record_validation_failure(collection);
        warn!(
            collection,
            fields = ?error.fields().collect::<Vec<_>>(),
            "Write rejected by validation"
        );
        self.activity.log_validation_failure(collection, principal.uid(), &error);
        DataError::Validation(error)
    }

    /// Check `action` against the stored document. Privileged principals
    /// skip the lookup (and get `Ok(None)`).
    async fn authorize_existing(
        &self,
        principal: &Principal,
        action: Action,
        collection: &str,
        id: &str,
        incoming: Option<&Fields>,
        retry: bool,
    ) -> Result<Option<Document>, DataError> {
        if principal.is_privileged() {
            return Ok(None);
        }
        let existing = self
            .fetch_raw(collection, id, retry)
            .await?
            .ok_or_else(|| DataError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        self.policy.check(principal, action, collection, Some(&existing), incoming)?;
        Ok(Some(existing))
    }

    /// Uncached store read
    async fn fetch_raw(&self, collection: &str, id: &str, retry: bool) -> Result<Option<Document>, DataError> {
        let store = Arc::clone(&self.store);
        let (c, i) = (collection.to_string(), id.to_string());
        self.execute("get", collection, retry, move || {
            let (store, c, i) = (Arc::clone(&store), c.clone(), i.clone());
            async move { store.get(&c, &i).await }
        })
        .await
    }

    async fn apply_patch(
        &self,
        operation: &'static str,
        collection: &str,
        id: &str,
        patch: DocumentPatch,
        retry: bool,
    ) -> Result<Document, DataError> {
        let store = Arc::clone(&self.store);
        let (c, i) = (collection.to_string(), id.to_string());
        self.execute(operation, collection, retry, move || {
            let (store, c, i, patch) = (Arc::clone(&store), c.clone(), i.clone(), patch.clone());
            async move { store.update(&c, &i, &patch).await }
        })
        .await
    }
}
