// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Data manager facade.
//!
//! The [`DataManager`] is the single entry point the admin panel uses for
//! document access. It ties together:
//! - the sanitizer (every write is cleaned and validated before the store sees it)
//! - the access policy (role rules and list scoping)
//! - the TTL + FIFO read cache
//! - the serialized retry queue for transient failures
//! - the real-time subscription manager
//! - the fire-and-forget activity log
//!
//! # Request flow
//!
//! ```text
//! write: principal → sanitize/validate → policy → store (timeout, retry) → invalidate → activity log
//! read:  principal → policy scope → cache? → store (timeout, retry) → policy → cache fill → activity log
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crm_data::{CrmDataConfig, DataManager, GetOptions, WriteOptions};
//! use crm_data::storage::InMemoryStore;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let manager = DataManager::new(CrmDataConfig::default(), Arc::new(InMemoryStore::new()));
//!
//! let data = json!({"name": "Sara Haddad", "phone": "+971 50 123 4567"});
//! let lead = manager
//!     .create("leads", data.as_object().unwrap().clone(), WriteOptions::new())
//!     .await
//!     .expect("create failed");
//! assert_eq!(lead.str_field("status"), Some("newLead"));
//!
//! let fetched = manager.get("leads", Some(&lead.id), GetOptions::new()).await.unwrap();
//! assert!(fetched.into_document().is_some());
//! # }
//! ```

mod api;
mod types;
mod write;

pub use types::{
    BatchOperation, BatchResult, DeleteOptions, Fetched, GetOptions, HealthCheck, WriteOptions,
};

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::access::{AccessPolicy, AuthContext, Principal, SystemContext};
use crate::activity::ActivityLogger;
use crate::cache::QueryCache;
use crate::config::CrmDataConfig;
use crate::error::DataError;
use crate::metrics;
use crate::realtime::SubscriptionManager;
use crate::resilience::retry::RetryQueue;
use crate::sanitize::{SchemaRegistry, Sanitizer};
use crate::storage::{DocumentStore, StorageError};

/// Data access facade.
///
/// `DataManager` is `Send + Sync`; share it behind an `Arc`. All state that
/// changes at runtime (cache, retry queue, listeners) uses interior
/// mutability.
pub struct DataManager {
    pub(super) config: CrmDataConfig,

    /// Backend document database
    pub(super) store: Arc<dyn DocumentStore>,

    /// Read cache, invalidated on every successful write
    pub(super) cache: QueryCache,

    /// Single-worker retry queue for transient store failures
    pub(super) retry_queue: RetryQueue,

    /// Real-time listeners and the shared connection state
    pub(super) subscriptions: SubscriptionManager,

    pub(super) sanitizer: Sanitizer,

    pub(super) policy: AccessPolicy,

    /// Source of the acting principal (session, fixed actor, system)
    pub(super) auth: Arc<dyn AuthContext>,

    /// Background writer for `activity_logs` / `validation_errors`
    pub(super) activity: ActivityLogger,
}

impl DataManager {
    /// Create a manager acting as [`Principal::System`] with the CRM schemas.
    pub fn new(config: CrmDataConfig, store: Arc<dyn DocumentStore>) -> Self {
        let cache = QueryCache::new(config.cache_ttl(), config.cache_max_entries);
        let retry_queue = RetryQueue::new(config.retry_config());
        let subscriptions = SubscriptionManager::new(Arc::clone(&store), config.reconnect_config());
        let activity = ActivityLogger::new(
            Arc::clone(&store),
            config.request_timeout(),
            config.activity_log_enabled,
            config.log_validation_errors,
        );

        info!(
            cache_ttl_ms = config.cache_ttl_ms,
            cache_max_entries = config.cache_max_entries,
            retry_attempts = config.retry_attempts,
            request_timeout_ms = config.request_timeout_ms,
            "Data manager created"
        );

        Self {
            config,
            store,
            cache,
            retry_queue,
            subscriptions,
            sanitizer: Sanitizer::new(SchemaRegistry::crm_defaults()),
            policy: AccessPolicy,
            auth: Arc::new(SystemContext),
            activity,
        }
    }

    /// Act on behalf of `auth` (usually a [`crate::session::SessionGuard`]).
    #[must_use]
    pub fn with_auth(mut self, auth: Arc<dyn AuthContext>) -> Self {
        self.auth = auth;
        self
    }

    /// Replace the collection schemas used to sanitize writes.
    #[must_use]
    pub fn with_schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.sanitizer = Sanitizer::new(schemas);
        self
    }

    #[must_use]
    pub fn config(&self) -> &CrmDataConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    #[must_use]
    pub fn retry_queue(&self) -> &RetryQueue {
        &self.retry_queue
    }

    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    #[must_use]
    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    #[must_use]
    pub fn activity(&self) -> &ActivityLogger {
        &self.activity
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Health & lifecycle
    // ═══════════════════════════════════════════════════════════════════════════

    /// Probe the store and collect component state.
    ///
    /// The store probe is bounded by the request timeout; everything else is
    /// read from in-memory state.
    pub async fn health_check(&self) -> HealthCheck {
        let start = Instant::now();
        let probe = tokio::time::timeout(self.config.request_timeout(), self.store.ping()).await;
        let store_latency_ms = match probe {
            Ok(Ok(())) => Some(start.elapsed().as_millis() as u64),
            Ok(Err(e)) => {
                warn!(error = %e, "Store health probe failed");
                None
            }
            Err(_) => {
                warn!("Store health probe timed out");
                None
            }
        };

        let health = HealthCheck::from_parts(
            store_latency_ms,
            self.subscriptions.state(),
            self.subscriptions.len(),
            self.subscriptions.reconnect_attempts(),
            &self.cache.stats(),
            self.retry_queue.pending(),
            self.auth.principal() != Principal::Anonymous,
            self.activity.failures(),
        );
        debug!(healthy = health.healthy, state = %health.connection_state, "Health check");
        health
    }

    /// Detach all listeners, cancel queued retries and wait for pending
    /// activity log writes.
    pub async fn shutdown(&self) {
        let listeners = self.subscriptions.unsubscribe_all();
        self.retry_queue.shutdown().await;
        self.activity.flush().await;
        info!(listeners, "Data manager shut down");
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Internals shared by the read and write paths
    // ═══════════════════════════════════════════════════════════════════════════

    pub(super) fn principal(&self) -> Result<Principal, DataError> {
        match self.auth.principal() {
            Principal::Anonymous => Err(DataError::Unauthenticated),
            principal => Ok(principal),
        }
    }

    /// Run one store call under the request timeout. With `retry` set, a
    /// transient failure is handed to the retry queue.
    pub(super) async fn execute<T, F, Fut>(
        &self,
        operation: &'static str,
        collection: &str,
        retry: bool,
        mut op: F,
    ) -> Result<T, DataError>
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, StorageError>> + Send + 'static,
    {
        let timeout = self.config.request_timeout();
        let name = format!("{}:{}", operation, collection);
        let attempt_name = name.clone();
        let attempt = move || {
            let call = op();
            let name = attempt_name.clone();
            async move {
                match tokio::time::timeout(timeout, call).await {
                    Ok(result) => result.map_err(DataError::from),
                    Err(_) => {
                        metrics::record_timeout(operation);
                        Err(DataError::Timeout { operation: name, timeout })
                    }
                }
            }
        };

        if !retry {
            let mut attempt = attempt;
            return attempt().await;
        }

        let retried = self.retry_queue.execute(&name, attempt).await?;
        if retried.retries > 0 {
            info!(operation = %name, retries = retried.retries, "Succeeded after retry");
        }
        Ok(retried.value)
    }

    /// Record the outcome of a public operation and notify the auth context.
    pub(super) fn finish<T>(
        &self,
        collection: &str,
        operation: &'static str,
        result: Result<T, DataError>,
    ) -> Result<T, DataError> {
        match &result {
            Ok(_) => {
                metrics::record_operation(collection, operation, "success");
                self.auth.record_activity();
            }
            Err(e) => {
                metrics::record_operation(collection, operation, "error");
                metrics::record_error(collection, operation, e.kind());
                match e {
                    DataError::Validation(_) | DataError::NotFound { .. } => {
                        debug!(collection, operation, kind = e.kind(), error = %e, "Operation rejected")
                    }
                    _ => warn!(collection, operation, kind = e.kind(), error = %e, "Operation failed"),
                }
            }
        }
        result
    }

    pub(super) fn request_timeout(&self) -> Duration {
        self.config.request_timeout()
    }
}
