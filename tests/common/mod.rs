//! Shared helpers for the integration, chaos and fuzz suites.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crm_data::document::{Document, Fields};
use crm_data::query::{AggregateValue, Aggregation, QueryOptions};
use crm_data::realtime::ChangeStream;
use crm_data::storage::{DocumentPatch, DocumentStore, InMemoryStore, StorageError, WriteOp, WriteResult};
use crm_data::{CrmDataConfig, DataManager};

/// Store calls that can have failures scripted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Query,
    Insert,
    Update,
    Delete,
    Commit,
    Listen,
    Ping,
}

/// Wraps an [`InMemoryStore`] and injects failures at precise points.
///
/// Failures are scripted per operation and consumed in order: after
/// `fail_next(Op::Insert, 2, ..)` the next two inserts fail and the third
/// reaches the inner store. A stalled store never answers.
pub struct FlakyStore {
    inner: InMemoryStore,
    scripted: Mutex<HashMap<Op, VecDeque<StorageError>>>,
    calls: Mutex<HashMap<Op, u64>>,
    stalled: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            scripted: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            stalled: AtomicBool::new(false),
        }
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    /// Fail the next `count` calls of `op` with `error`
    pub fn fail_next(&self, op: Op, count: usize, error: StorageError) {
        let mut scripted = self.scripted.lock();
        let queue = scripted.entry(op).or_default();
        queue.extend(std::iter::repeat(error).take(count));
    }

    /// Calls made to `op`, including failed ones
    pub fn calls(&self, op: Op) -> u64 {
        self.calls.lock().get(&op).copied().unwrap_or(0)
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    async fn enter(&self, op: Op) -> Result<(), StorageError> {
        *self.calls.lock().entry(op).or_insert(0) += 1;
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let scripted = self.scripted.lock().get_mut(&op).and_then(VecDeque::pop_front);
        match scripted {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StorageError> {
        self.enter(Op::Get).await?;
        self.inner.get(collection, id).await
    }

    async fn query(&self, collection: &str, query: &QueryOptions) -> Result<Vec<Document>, StorageError> {
        self.enter(Op::Query).await?;
        self.inner.query(collection, query).await
    }

    async fn insert(&self, doc: &Document) -> Result<Document, StorageError> {
        self.enter(Op::Insert).await?;
        self.inner.insert(doc).await
    }

    async fn update(&self, collection: &str, id: &str, patch: &DocumentPatch) -> Result<Document, StorageError> {
        self.enter(Op::Update).await?;
        self.inner.update(collection, id, patch).await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StorageError> {
        self.enter(Op::Delete).await?;
        self.inner.delete(collection, id).await
    }

    async fn commit(&self, ops: Vec<WriteOp>) -> Result<WriteResult, StorageError> {
        self.enter(Op::Commit).await?;
        self.inner.commit(ops).await
    }

    async fn aggregate(
        &self,
        collection: &str,
        query: &QueryOptions,
        aggregation: &Aggregation,
    ) -> Result<AggregateValue, StorageError> {
        self.enter(Op::Query).await?;
        self.inner.aggregate(collection, query, aggregation).await
    }

    async fn listen(&self, collection: &str, query: &QueryOptions) -> Result<ChangeStream, StorageError> {
        self.enter(Op::Listen).await?;
        self.inner.listen(collection, query).await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.enter(Op::Ping).await?;
        self.inner.ping().await
    }
}

/// Fast config for tests: no retry spacing. Activity logging is off so
/// store call counts only reflect the operation under test.
pub fn test_config() -> CrmDataConfig {
    CrmDataConfig {
        retry_delay_ms: 0,
        reconnect_base_delay_ms: 10,
        activity_log_enabled: false,
        log_validation_errors: false,
        ..Default::default()
    }
}

/// A manager over a flaky store, plus handles to both layers.
pub fn flaky_manager(config: CrmDataConfig) -> (DataManager, Arc<FlakyStore>) {
    let store = Arc::new(FlakyStore::new(InMemoryStore::new()));
    let manager = DataManager::new(config, Arc::clone(&store) as Arc<dyn DocumentStore>);
    (manager, store)
}

pub fn fields(value: Value) -> Fields {
    value.as_object().cloned().expect("object literal")
}

pub fn lead(name: &str) -> Fields {
    fields(serde_json::json!({"name": name, "phone": "+971 50 123 4567"}))
}

/// Install a test subscriber once (RUST_LOG controls output)
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
