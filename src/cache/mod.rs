// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Read cache
//!
//! Caches `get`, `list` and `aggregate` results for a fixed TTL.
//!
//! - Key = collection + document id (or `all`) + canonical query options, so
//!   identical reads name the same entry
//! - Entries older than the TTL are stale and removed on access
//! - Bounded by max entries with oldest-inserted eviction (FIFO, not LRU)
//! - Writes invalidate the written document and every list entry of its
//!   collection
//!
//! # Flow
//!
//! ```text
//! Read arrives
//!       │
//!       ▼
//! ┌──────────────────────────────┐
//! │  Cache lookup                │
//! │  key = (collection, id|all,  │
//! │         canonical options)   │
//! │  check: age < ttl ?          │
//! └──────────────────────────────┘
//!       │
//!       ├─→ Hit + fresh → return cached payload
//!       │
//!       └─→ Miss OR expired → read store, cache result
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::document::Document;
use crate::metrics;
use crate::query::{AggregateValue, Aggregation, QueryOptions};

/// Cache key: (collection, id or "all", canonical options)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub collection: String,
    pub id: Option<String>,
    pub options: String,
}

impl CacheKey {
    #[must_use]
    pub fn new(collection: &str, id: Option<&str>, query: &QueryOptions) -> Self {
        Self {
            collection: collection.to_string(),
            id: id.map(str::to_string),
            options: query.canonical_key(),
        }
    }

    /// Aggregations are list-shaped: they go stale with any write to the
    /// collection.
    #[must_use]
    pub fn for_aggregate(collection: &str, query: &QueryOptions, aggregation: &Aggregation) -> Self {
        Self {
            collection: collection.to_string(),
            id: None,
            options: format!("{}|{}", aggregation.label(), query.canonical_key()),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.collection,
            self.id.as_deref().unwrap_or("all"),
            self.options
        )
    }
}

/// Cached read result
#[derive(Debug, Clone, PartialEq)]
pub enum CachedPayload {
    Document(Option<Document>),
    Documents(Vec<Document>),
    Aggregate(AggregateValue),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: CachedPayload,
    inserted_at: Instant,
    /// Matches the order record that owns this entry
    seq: u64,
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries found but older than the TTL
    pub expired: u64,
    /// Entries dropped for capacity
    pub evictions: u64,
    pub entry_count: usize,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

/// TTL + FIFO read cache
pub struct QueryCache {
    cache: DashMap<CacheKey, CacheEntry>,
    /// Insertion order for eviction (oldest first). Records whose seq no
    /// longer matches the live entry are skipped.
    order: Mutex<VecDeque<(CacheKey, u64)>>,
    next_seq: AtomicU64,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    evictions: AtomicU64,
}

impl QueryCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            cache: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            next_seq: AtomicU64::new(0),
            ttl,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh cached payload for `key`, if any
    pub fn lookup(&self, key: &CacheKey) -> Option<CachedPayload> {
        if let Some(entry) = self.cache.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache(true);
                return Some(entry.payload.clone());
            }
            let seq = entry.seq;
            drop(entry); // Release read lock before removing
            if self.cache.remove_if(key, |_, e| e.seq == seq).is_some() {
                self.expired.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache entry expired");
                metrics::set_cache_entries(self.cache.len());
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache(false);
        None
    }

    /// Cache a read result, evicting the oldest entries if at capacity
    pub fn cache_result(&self, key: CacheKey, payload: CachedPayload) {
        let mut order = self.order.lock();

        if !self.cache.contains_key(&key) {
            while self.cache.len() >= self.max_entries {
                let Some((old_key, old_seq)) = order.pop_front() else {
                    break;
                };
                if self.cache.remove_if(&old_key, |_, e| e.seq == old_seq).is_some() {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    metrics::record_cache_eviction();
                    debug!(key = %old_key, "Evicted oldest cache entry");
                }
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        order.push_back((key.clone(), seq));
        self.cache.insert(
            key,
            CacheEntry {
                payload,
                inserted_at: Instant::now(),
                seq,
            },
        );

        // Keep stale order records from piling up under repeated re-caching
        if order.len() > self.max_entries * 2 {
            order.retain(|(k, s)| self.cache.get(k).is_some_and(|e| e.seq == *s));
        }
        metrics::set_cache_entries(self.cache.len());
    }

    /// Drop entries of `collection`. With `id`, only that document's
    /// entries plus the collection's list and aggregate entries go.
    /// Returns how many entries were removed.
    pub fn invalidate(&self, collection: &str, id: Option<&str>) -> usize {
        let before = self.cache.len();
        self.cache.retain(|key, _| {
            if key.collection != collection {
                return true;
            }
            match (id, key.id.as_deref()) {
                (Some(target), Some(cached)) => cached != target,
                _ => false,
            }
        });
        let removed = before.saturating_sub(self.cache.len());
        if removed > 0 {
            debug!(collection, id = ?id, removed, "Invalidated cache entries");
            metrics::set_cache_entries(self.cache.len());
        }
        removed
    }

    /// Clear all cached entries
    pub fn clear(&self) {
        let mut order = self.order.lock();
        self.cache.clear();
        order.clear();
        metrics::set_cache_entries(0);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            expired: self.expired.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entry_count: self.cache.len(),
            hit_rate: if total > 0 { hits as f64 / total as f64 } else { 0.0 },
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        // 5 minutes, 100 entries
        Self::new(Duration::from_secs(300), 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Fields;

    fn doc_key(collection: &str, id: &str) -> CacheKey {
        CacheKey::new(collection, Some(id), &QueryOptions::new())
    }

    fn list_key(collection: &str, query: &QueryOptions) -> CacheKey {
        CacheKey::new(collection, None, query)
    }

    fn payload(id: &str) -> CachedPayload {
        CachedPayload::Document(Some(Document::new("leads", id, Fields::new())))
    }

    #[tokio::test]
    async fn test_cache_hit() {
        let cache = QueryCache::default();
        let key = doc_key("leads", "a");

        assert!(cache.lookup(&key).is_none());
        cache.cache_result(key.clone(), payload("a"));
        assert_eq!(cache.lookup(&key), Some(payload("a")));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_after_ttl() {
        let cache = QueryCache::new(Duration::from_secs(300), 10);
        let key = doc_key("leads", "a");
        cache.cache_result(key.clone(), payload("a"));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert!(cache.lookup(&key).is_some());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(cache.lookup(&key).is_none());
        assert!(cache.is_empty(), "expired entry removed on access");
        assert_eq!(cache.stats().expired, 1);
    }

    #[tokio::test]
    async fn test_fifo_eviction_of_first_inserted() {
        let cache = QueryCache::new(Duration::from_secs(300), 3);
        for id in ["a", "b", "c"] {
            cache.cache_result(doc_key("leads", id), payload(id));
        }
        // Reading "a" does not protect it: FIFO, not LRU
        assert!(cache.lookup(&doc_key("leads", "a")).is_some());

        cache.cache_result(doc_key("leads", "d"), payload("d"));
        assert_eq!(cache.len(), 3);
        assert!(cache.lookup(&doc_key("leads", "a")).is_none());
        assert!(cache.lookup(&doc_key("leads", "b")).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_eviction_skips_already_removed() {
        let cache = QueryCache::new(Duration::from_secs(300), 2);
        cache.cache_result(doc_key("leads", "a"), payload("a"));
        cache.cache_result(doc_key("leads", "b"), payload("b"));
        cache.invalidate("leads", Some("a"));

        cache.cache_result(doc_key("leads", "c"), payload("c"));
        cache.cache_result(doc_key("leads", "d"), payload("d"));
        // "b" was the first-inserted key still present
        assert!(cache.lookup(&doc_key("leads", "b")).is_none());
        assert!(cache.lookup(&doc_key("leads", "c")).is_some());
        assert!(cache.lookup(&doc_key("leads", "d")).is_some());
    }

    #[tokio::test]
    async fn test_recache_existing_key_does_not_evict() {
        let cache = QueryCache::new(Duration::from_secs(300), 2);
        cache.cache_result(doc_key("leads", "a"), payload("a"));
        cache.cache_result(doc_key("leads", "b"), payload("b"));
        cache.cache_result(doc_key("leads", "a"), payload("a"));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test]
    async fn test_invalidate_document_and_lists() {
        let cache = QueryCache::default();
        let all = list_key("leads", &QueryOptions::new());
        let filtered = list_key("leads", &QueryOptions::new().where_eq("status", "newLead"));
        cache.cache_result(doc_key("leads", "a"), payload("a"));
        cache.cache_result(doc_key("leads", "b"), payload("b"));
        cache.cache_result(all.clone(), CachedPayload::Documents(vec![]));
        cache.cache_result(filtered.clone(), CachedPayload::Documents(vec![]));
        cache.cache_result(doc_key("users", "a"), payload("a"));

        assert_eq!(cache.invalidate("leads", Some("a")), 3);
        assert!(cache.lookup(&doc_key("leads", "b")).is_some());
        assert!(cache.lookup(&doc_key("users", "a")).is_some());
        assert!(cache.lookup(&all).is_none());

        assert_eq!(cache.invalidate("leads", None), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_key_display_and_determinism() {
        let a = CacheKey::new("leads", None, &QueryOptions::new().where_eq("x", 1).where_eq("y", 2));
        let b = CacheKey::new("leads", None, &QueryOptions::new().where_eq("y", 2).where_eq("x", 1));
        assert_eq!(a, b);
        assert!(a.to_string().starts_with("leads:all:"));
        assert!(doc_key("leads", "z").to_string().starts_with("leads:z:"));
    }

    #[test]
    fn test_aggregate_key_differs_from_list_key() {
        let query = QueryOptions::new();
        let agg = CacheKey::for_aggregate("leads", &query, &Aggregation::Count);
        assert_ne!(agg, list_key("leads", &query));
        assert_eq!(agg.id, None);
    }

    #[test]
    fn test_clear() {
        let cache = QueryCache::default();
        cache.cache_result(doc_key("leads", "a"), payload("a"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
