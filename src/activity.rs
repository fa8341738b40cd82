//! Fire-and-forget activity logging.
//!
//! Every successful data operation served by the store (cache hits are not)
//! is recorded as a document in `activity_logs`. Writes are spawned on Tokio and never awaited by the
//! operation that produced them. Each write is bounded by the request
//! timeout; a failed or timed-out log write is reported through `tracing` and
//! a counter, never to the caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::collections;
use crate::document::{now_millis, Document, Fields};
use crate::metrics;
use crate::sanitize::ValidationError;
use crate::storage::DocumentStore;

/// Field names beyond this are not recorded
pub const MAX_LOGGED_FIELDS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ActivityAction {
    Read,
    Create,
    Update,
    Delete,
    SoftDelete,
    BatchWrite,
    Subscribe,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub action: ActivityAction,
    pub collection: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub timestamp: i64,
    /// Touched field names, truncated to [`MAX_LOGGED_FIELDS`]
    pub fields: Vec<String>,
}

impl ActivityEntry {
    pub fn new(action: ActivityAction, collection: impl Into<String>) -> Self {
        Self {
            action,
            collection: collection.into(),
            document_id: None,
            actor_id: None,
            timestamp: now_millis(),
            fields: Vec::new(),
        }
    }

    #[must_use]
    pub fn document(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn actor(mut self, uid: Option<&str>) -> Self {
        self.actor_id = uid.map(str::to_string);
        self
    }

    #[must_use]
    pub fn fields(mut self, fields: &Fields) -> Self {
        self.fields = field_summary(fields);
        self
    }
}

/// Sorted field names, at most [`MAX_LOGGED_FIELDS`]
#[must_use]
pub fn field_summary(fields: &Fields) -> Vec<String> {
    fields.keys().take(MAX_LOGGED_FIELDS).cloned().collect()
}

fn to_fields<T: Serialize>(value: &T) -> Option<Fields> {
    match serde_json::to_value(value) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Background writer for `activity_logs` and `validation_errors`.
pub struct ActivityLogger {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
    enabled: bool,
    log_validation_errors: bool,
    tasks: Mutex<JoinSet<()>>,
    written: Arc<AtomicU64>,
    failures: Arc<AtomicU64>,
}

impl ActivityLogger {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration, enabled: bool, log_validation_errors: bool) -> Self {
        Self {
            store,
            timeout,
            enabled,
            log_validation_errors,
            tasks: Mutex::new(JoinSet::new()),
            written: Arc::new(AtomicU64::new(0)),
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Record an operation. Returns immediately.
    pub fn log(&self, entry: ActivityEntry) {
        // Logging the log would recurse
        if !self.enabled || entry.collection == collections::ACTIVITY_LOGS {
            return;
        }
        let Some(fields) = to_fields(&entry) else {
            return;
        };
        self.spawn_write(collections::ACTIVITY_LOGS, fields);
    }

    /// Record a rejected write into `validation_errors`.
    pub fn log_validation_failure(&self, collection: &str, actor_id: Option<&str>, error: &ValidationError) {
        if !self.log_validation_errors {
            return;
        }
        let mut fields = Fields::new();
        fields.insert("collection".into(), Value::from(collection));
        if let Some(uid) = actor_id {
            fields.insert("actorId".into(), Value::from(uid));
        }
        fields.insert("timestamp".into(), Value::from(now_millis()));
        let errors: Vec<Value> = error
            .errors
            .iter()
            .take(MAX_LOGGED_FIELDS)
            .filter_map(|e| serde_json::to_value(e).ok())
            .collect();
        fields.insert("errors".into(), Value::Array(errors));
        self.spawn_write(collections::VALIDATION_ERRORS, fields);
    }

    fn spawn_write(&self, collection: &'static str, fields: Fields) {
        let store = Arc::clone(&self.store);
        let written = Arc::clone(&self.written);
        let failures = Arc::clone(&self.failures);
        let timeout = self.timeout;

        let mut tasks = self.tasks.lock();
        // Reap finished writes so the set stays small
        while tasks.try_join_next().is_some() {}
        tasks.spawn(async move {
            let doc = Document::new(collection, store.generate_id(), fields);
            match tokio::time::timeout(timeout, store.insert(&doc)).await {
                Ok(Ok(_)) => {
                    written.fetch_add(1, Ordering::Relaxed);
                    debug!(collection, id = %doc.id, "Activity recorded");
                }
                Ok(Err(e)) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    metrics::record_activity_log_failure();
                    warn!(collection, error = %e, "Failed to record activity");
                }
                Err(_) => {
                    failures.fetch_add(1, Ordering::Relaxed);
                    metrics::record_activity_log_failure();
                    warn!(collection, timeout_ms = timeout.as_millis() as u64, "Activity write timed out");
                }
            }
        });
    }

    /// Wait for every in-flight log write. Bounded by the write timeout.
    pub async fn flush(&self) {
        let mut pending = std::mem::take(&mut *self.tasks.lock());
        while pending.join_next().await.is_some() {}
    }

    #[must_use]
    pub fn written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryOptions;
    use crate::sanitize::FieldError;
    use crate::storage::InMemoryStore;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_field_summary_truncates() {
        let fields: Fields = (0..15).map(|i| (format!("f{:02}", i), json!(i))).collect();
        let summary = field_summary(&fields);
        assert_eq!(summary.len(), MAX_LOGGED_FIELDS);
        assert_eq!(summary[0], "f00");
        assert_eq!(summary[9], "f09");
    }

    #[tokio::test]
    async fn test_log_writes_entry() {
        let store = InMemoryStore::new();
        let logger = ActivityLogger::new(Arc::new(store.clone()), TIMEOUT, true, true);

        let entry = ActivityEntry::new(ActivityAction::Create, "leads")
            .document("lead-1")
            .actor(Some("u1"))
            .fields(json!({"name": "x", "phone": "y"}).as_object().unwrap());
        logger.log(entry);
        logger.flush().await;

        let logs = store.query(collections::ACTIVITY_LOGS, &QueryOptions::new()).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].str_field("action"), Some("create"));
        assert_eq!(logs[0].str_field("documentId"), Some("lead-1"));
        assert_eq!(logs[0].fields["fields"], json!(["name", "phone"]));
        assert_eq!(logger.written(), 1);
    }

    #[tokio::test]
    async fn test_disabled_and_self_logging_skipped() {
        let store = InMemoryStore::new();
        let disabled = ActivityLogger::new(Arc::new(store.clone()), TIMEOUT, false, false);
        disabled.log(ActivityEntry::new(ActivityAction::Read, "leads"));
        disabled.log_validation_failure("leads", None, &ValidationError::single(FieldError::new("a", "b")));
        disabled.flush().await;

        let enabled = ActivityLogger::new(Arc::new(store.clone()), TIMEOUT, true, true);
        enabled.log(ActivityEntry::new(ActivityAction::Read, collections::ACTIVITY_LOGS));
        enabled.flush().await;

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_validation_failure_recorded() {
        let store = InMemoryStore::new();
        let logger = ActivityLogger::new(Arc::new(store.clone()), TIMEOUT, true, true);
        logger.log_validation_failure(
            "leads",
            Some("u1"),
            &ValidationError::single(FieldError::new("phone", "Invalid phone number")),
        );
        logger.flush().await;

        let rows = store.query(collections::VALIDATION_ERRORS, &QueryOptions::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].fields["errors"][0]["field"], "phone");
    }
}
