//! Option and result types for the data manager.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::document::{Document, Fields};
use crate::query::QueryOptions;
use crate::realtime::ConnectionState;

/// Options for [`super::DataManager::get`].
#[derive(Debug, Clone, PartialEq)]
pub struct GetOptions {
    /// Filters, ordering and pagination (list reads)
    pub query: QueryOptions,
    /// Serve from / populate the read cache
    pub cache: bool,
    /// Caller needs live data: bypasses the cache
    pub realtime: bool,
    /// Hand transient failures to the retry queue
    pub retry: bool,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            query: QueryOptions::default(),
            cache: true,
            realtime: false,
            retry: true,
        }
    }
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn query(mut self, query: QueryOptions) -> Self {
        self.query = query;
        self
    }

    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.cache = false;
        self
    }

    #[must_use]
    pub fn realtime(mut self) -> Self {
        self.realtime = true;
        self
    }

    #[must_use]
    pub fn no_retry(mut self) -> Self {
        self.retry = false;
        self
    }

    pub(super) fn use_cache(&self) -> bool {
        self.cache && !self.realtime
    }
}

/// Options for create and update.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOptions {
    /// Caller-chosen document id (create only)
    pub id: Option<String>,
    /// Optimistic lock: reject the update unless the stored version matches
    pub expected_version: Option<u64>,
    pub retry: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            id: None,
            expected_version: None,
            retry: true,
        }
    }
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn expected_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    #[must_use]
    pub fn no_retry(mut self) -> Self {
        self.retry = false;
        self
    }
}

/// Options for delete.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteOptions {
    /// Flag the document deleted instead of removing it
    pub soft_delete: bool,
    pub expected_version: Option<u64>,
    pub retry: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            soft_delete: false,
            expected_version: None,
            retry: true,
        }
    }
}

impl DeleteOptions {
    pub fn hard() -> Self {
        Self::default()
    }

    pub fn soft() -> Self {
        Self {
            soft_delete: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn expected_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }

    #[must_use]
    pub fn no_retry(mut self) -> Self {
        self.retry = false;
        self
    }
}

/// Result of [`super::DataManager::get`]
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Document(Option<Document>),
    List(Vec<Document>),
}

impl Fetched {
    #[must_use]
    pub fn into_document(self) -> Option<Document> {
        match self {
            Fetched::Document(doc) => doc,
            Fetched::List(_) => None,
        }
    }

    #[must_use]
    pub fn into_list(self) -> Vec<Document> {
        match self {
            Fetched::Document(doc) => doc.into_iter().collect(),
            Fetched::List(docs) => docs,
        }
    }
}

/// One member of [`super::DataManager::batch_write`]
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    Create {
        collection: String,
        id: Option<String>,
        data: Fields,
    },
    Update {
        collection: String,
        id: String,
        data: Fields,
        expected_version: Option<u64>,
    },
    Delete {
        collection: String,
        id: String,
        soft_delete: bool,
    },
}

impl BatchOperation {
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Create { collection, .. } | Self::Update { collection, .. } | Self::Delete { collection, .. } => {
                collection
            }
        }
    }
}

/// Result of an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    /// Operations in the batch
    pub total: usize,
    /// Documents created or updated, as stored
    pub documents: Vec<Document>,
    /// Documents hard-deleted
    pub deleted: usize,
}

/// Health snapshot of the data layer.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
    /// Store reachable and real-time channel not failed
    pub healthy: bool,
    pub store_connected: bool,
    pub store_latency_ms: Option<u64>,
    pub connection_state: ConnectionState,
    pub subscriptions: usize,
    pub reconnect_attempts: u32,
    pub cache_entries: usize,
    pub cache_hit_rate: f64,
    pub retry_queue_depth: usize,
    pub authenticated: bool,
    pub activity_log_failures: u64,
}

impl HealthCheck {
    pub(super) fn from_parts(
        store_latency_ms: Option<u64>,
        connection_state: ConnectionState,
        subscriptions: usize,
        reconnect_attempts: u32,
        cache: &CacheStats,
        retry_queue_depth: usize,
        authenticated: bool,
        activity_log_failures: u64,
    ) -> Self {
        let store_connected = store_latency_ms.is_some();
        Self {
            healthy: store_connected && connection_state != ConnectionState::Failed,
            store_connected,
            store_latency_ms,
            connection_state,
            subscriptions,
            reconnect_attempts,
            cache_entries: cache.entry_count,
            cache_hit_rate: cache.hit_rate,
            retry_queue_depth,
            authenticated,
            activity_log_failures,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_options_cache_rules() {
        assert!(GetOptions::new().use_cache());
        assert!(!GetOptions::new().no_cache().use_cache());
        assert!(!GetOptions::new().realtime().use_cache());
    }

    #[test]
    fn test_fetched_conversions() {
        let doc = Document::new("leads", "a", Fields::new());
        assert_eq!(Fetched::Document(Some(doc.clone())).into_list().len(), 1);
        assert!(Fetched::List(vec![doc]).into_document().is_none());
    }

    #[test]
    fn test_health_derivation() {
        let stats = CacheStats {
            hits: 0,
            misses: 0,
            expired: 0,
            evictions: 0,
            entry_count: 0,
            hit_rate: 0.0,
        };
        let ok = HealthCheck::from_parts(Some(1), ConnectionState::Connected, 1, 0, &stats, 0, true, 0);
        assert!(ok.healthy);

        let failed = HealthCheck::from_parts(Some(1), ConnectionState::Failed, 1, 6, &stats, 0, true, 0);
        assert!(!failed.healthy);

        let down = HealthCheck::from_parts(None, ConnectionState::Disconnected, 0, 0, &stats, 0, true, 0);
        assert!(!down.healthy);
        assert!(!down.store_connected);
    }
}
