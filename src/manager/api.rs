//! Read API: get, list, aggregate and real-time subscriptions.

use std::sync::Arc;

use tracing::debug;

use super::types::{Fetched, GetOptions};
use super::DataManager;
use crate::access::Action;
use crate::activity::{ActivityAction, ActivityEntry};
use crate::cache::{CacheKey, CachedPayload};
use crate::document::Document;
use crate::error::DataError;
use crate::query::{AggregateValue, Aggregation, QueryOptions};
use crate::realtime::{ListenerId, Snapshot};

impl DataManager {
    // ═══════════════════════════════════════════════════════════════════════════
    // Reads
    // ═══════════════════════════════════════════════════════════════════════════

    /// Fetch one document (`id` given) or a list (`id` is `None`).
    ///
    /// Results are cached unless `options.cache` is false or
    /// `options.realtime` is set. Soft-deleted documents are hidden unless
    /// `options.query.include_deleted` is set.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use std::sync::Arc;
    /// # use crm_data::{CrmDataConfig, DataManager, GetOptions};
    /// # use crm_data::query::QueryOptions;
    /// # use crm_data::storage::InMemoryStore;
    /// # async fn example(manager: &DataManager) {
    /// let new_leads = manager
    ///     .get("leads", None, GetOptions::new().query(QueryOptions::new().where_eq("status", "newLead")))
    ///     .await
    ///     .expect("list failed")
    ///     .into_list();
    /// # }
    /// ```
    #[tracing::instrument(skip(self, options), fields(collection = %collection, id = ?id))]
    pub async fn get(
        &self,
        collection: &str,
        id: Option<&str>,
        options: GetOptions,
    ) -> Result<Fetched, DataError> {
        match id {
            Some(id) => self.get_document(collection, id, options).await.map(Fetched::Document),
            None => self.list(collection, options).await.map(Fetched::List),
        }
    }

    /// Fetch one document by id. `Ok(None)` if it does not exist.
    pub async fn get_document(
        &self,
        collection: &str,
        id: &str,
        options: GetOptions,
    ) -> Result<Option<Document>, DataError> {
        let _timer = crate::time_operation!(collection, "get");
        let result = self.read_document(collection, id, &options).await;
        self.finish(collection, "get", result)
    }

    async fn read_document(
        &self,
        collection: &str,
        id: &str,
        options: &GetOptions,
    ) -> Result<Option<Document>, DataError> {
        let principal = self.principal()?;
        let key = CacheKey::new(collection, Some(id), &options.query);

        if options.use_cache() {
            if let Some(CachedPayload::Document(doc)) = self.cache.lookup(&key) {
                if let Some(ref doc) = doc {
                    self.policy.check(&principal, Action::Read, collection, Some(doc), None)?;
                }
                debug!(key = %key, "Served from cache");
                return Ok(doc);
            }
        }

        let store = Arc::clone(&self.store);
        let (c, i) = (collection.to_string(), id.to_string());
        let doc = self
            .execute("get", collection, options.retry, move || {
                let (store, c, i) = (Arc::clone(&store), c.clone(), i.clone());
                async move { store.get(&c, &i).await }
            })
            .await?
            .filter(|doc| options.query.include_deleted || !doc.deleted);

        if let Some(ref doc) = doc {
            self.policy.check(&principal, Action::Read, collection, Some(doc), None)?;
        }

        if options.use_cache() {
            self.cache.cache_result(key, CachedPayload::Document(doc.clone()));
        }

        self.activity.log(
            ActivityEntry::new(ActivityAction::Read, collection)
                .document(id)
                .actor(principal.uid()),
        );
        Ok(doc)
    }

    /// Fetch the documents matching `options.query`, narrowed to what the
    /// acting principal may read.
    pub async fn list(&self, collection: &str, options: GetOptions) -> Result<Vec<Document>, DataError> {
        let _timer = crate::time_operation!(collection, "list");
        let result = self.read_list(collection, options).await;
        self.finish(collection, "list", result)
    }

    async fn read_list(&self, collection: &str, options: GetOptions) -> Result<Vec<Document>, DataError> {
        let principal = self.principal()?;
        let use_cache = options.use_cache();
        let query = self.policy.scope_query(&principal, collection, options.query)?;
        let key = CacheKey::new(collection, None, &query);

        if use_cache {
            if let Some(CachedPayload::Documents(docs)) = self.cache.lookup(&key) {
                debug!(key = %key, count = docs.len(), "Served from cache");
                return Ok(docs);
            }
        }

        let store = Arc::clone(&self.store);
        let c = collection.to_string();
        let q = query.clone();
        let docs = self
            .execute("list", collection, options.retry, move || {
                let (store, c, q) = (Arc::clone(&store), c.clone(), q.clone());
                async move { store.query(&c, &q).await }
            })
            .await?;

        if use_cache {
            self.cache.cache_result(key, CachedPayload::Documents(docs.clone()));
        }

        self.activity.log(ActivityEntry::new(ActivityAction::Read, collection).actor(principal.uid()));
        Ok(docs)
    }

    /// Count / sum / average / min / max over the matching documents.
    ///
    /// Cached like a list read and invalidated by any write to the
    /// collection.
    #[tracing::instrument(skip(self, query), fields(collection = %collection, aggregation = %aggregation.label()))]
    pub async fn aggregate(
        &self,
        collection: &str,
        query: QueryOptions,
        aggregation: Aggregation,
    ) -> Result<AggregateValue, DataError> {
        let _timer = crate::time_operation!(collection, "aggregate");
        let result = self.read_aggregate(collection, query, aggregation).await;
        self.finish(collection, "aggregate", result)
    }

    async fn read_aggregate(
        &self,
        collection: &str,
        query: QueryOptions,
        aggregation: Aggregation,
    ) -> Result<AggregateValue, DataError> {
        let principal = self.principal()?;
        let query = self.policy.scope_query(&principal, collection, query)?;
        let key = CacheKey::for_aggregate(collection, &query, &aggregation);

        if let Some(CachedPayload::Aggregate(value)) = self.cache.lookup(&key) {
            return Ok(value);
        }

        let store = Arc::clone(&self.store);
        let c = collection.to_string();
        let q = query.clone();
        let agg = aggregation.clone();
        let value = self
            .execute("aggregate", collection, true, move || {
                let (store, c, q, agg) = (Arc::clone(&store), c.clone(), q.clone(), agg.clone());
                async move { store.aggregate(&c, &q, &agg).await }
            })
            .await?;

        self.cache.cache_result(key, CachedPayload::Aggregate(value));
        self.activity.log(ActivityEntry::new(ActivityAction::Read, collection).actor(principal.uid()));
        Ok(value)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // Real-time
    // ═══════════════════════════════════════════════════════════════════════════

    /// Attach a real-time listener. The query is narrowed to what the acting
    /// principal may read. Subscribing twice with the same collection and
    /// query returns the same [`ListenerId`].
    #[tracing::instrument(skip(self, query, callback), fields(collection = %collection))]
    pub async fn subscribe<F>(
        &self,
        collection: &str,
        query: QueryOptions,
        callback: F,
    ) -> Result<ListenerId, DataError>
    where
        F: Fn(&Snapshot) + Send + Sync + 'static,
    {
        let result = async {
            let principal = self.principal()?;
            let query = self.policy.scope_query(&principal, collection, query)?;
            let timeout = self.request_timeout();
            let id = match tokio::time::timeout(timeout, self.subscriptions.subscribe(collection, &query, callback)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(DataError::Timeout {
                        operation: format!("subscribe:{}", collection),
                        timeout,
                    })
                }
            };
            self.activity.log(ActivityEntry::new(ActivityAction::Subscribe, collection).actor(principal.uid()));
            Ok(id)
        }
        .await;
        self.finish(collection, "subscribe", result)
    }

    /// Detach a listener. Returns false if it was not attached.
    pub fn unsubscribe(&self, id: &ListenerId) -> bool {
        self.subscriptions.unsubscribe(id)
    }

    /// Detach every listener.
    pub fn unsubscribe_all(&self) -> usize {
        self.subscriptions.unsubscribe_all()
    }
}
