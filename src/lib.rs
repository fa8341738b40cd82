//! # CRM Data
//!
//! Data-access layer for a real-estate CRM admin panel backed by a hosted
//! document database.
//!
//! ## Architecture
//!
//! Every read and write goes through one facade, [`DataManager`]:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       DataManager                           │
//! │  • get / list / aggregate / subscribe                      │
//! │  • create / update / delete / batch_write                  │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │ Sanitizer        │ │ AccessPolicy     │ │ QueryCache       │
//! │ • strip markup   │ │ • role rules     │ │ • 5 min TTL      │
//! │ • validate shape │ │ • list scoping   │ │ • 100 entries    │
//! │ • enum coercion  │ │ • ownership      │ │ • FIFO eviction  │
//! └──────────────────┘ └──────────────────┘ └──────────────────┘
//!                               │
//!                  (request timeout, retry queue)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DocumentStore                            │
//! │  • CAS updates on version, atomic commits                  │
//! │  • change streams feeding the SubscriptionManager          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use crm_data::{CrmDataConfig, DataManager, GetOptions, WriteOptions};
//! use crm_data::storage::InMemoryStore;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = DataManager::new(CrmDataConfig::default(), Arc::new(InMemoryStore::new()));
//!
//!     let data = json!({"name": "<b>Omar</b> Khalil", "phone": "+971 50 765 4321"});
//!     let lead = manager
//!         .create("leads", data.as_object().unwrap().clone(), WriteOptions::new())
//!         .await
//!         .expect("Failed to create lead");
//!     assert_eq!(lead.str_field("name"), Some("Omar Khalil"));
//!
//!     let same = manager.get("leads", Some(&lead.id), GetOptions::new()).await.unwrap();
//!     println!("{:?}", same);
//!
//!     manager.shutdown().await;
//! }
//! ```
//!
//! ## Features
//!
//! - **Sanitized writes**: markup stripped, shapes validated, unknown enum values coerced
//! - **Read cache**: TTL + FIFO, invalidated on every write to the collection
//! - **Retry queue**: serialized, linear backoff, failed tasks retried first
//! - **Optimistic locking**: `expected_version` on update and delete
//! - **Real-time listeners**: deduplicated, exponential reconnect, observable state
//! - **Activity log**: fire-and-forget record of every successful operation
//! - **Sessions**: persisted actor with idle timeout
//!
//! ## Modules
//!
//! - [`manager`]: The [`DataManager`] facade
//! - [`storage`]: Store trait and the in-process backend
//! - [`sanitize`]: Field sanitization, validation and collection schemas
//! - [`cache`]: TTL + FIFO read cache
//! - [`resilience`]: Retry queue and backoff
//! - [`realtime`]: Change streams and the subscription manager
//! - [`access`]: Roles and the access policy
//! - [`session`]: Session persistence and idle timeout

pub mod access;
pub mod activity;
pub mod cache;
pub mod collections;
pub mod config;
pub mod document;
pub mod error;
pub mod manager;
pub mod metrics;
pub mod query;
pub mod realtime;
pub mod resilience;
pub mod sanitize;
pub mod session;
pub mod storage;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use access::{AccessPolicy, Actor, AuthContext, Principal, Role, SystemContext};
pub use config::CrmDataConfig;
pub use document::{Document, Fields};
pub use error::DataError;
pub use manager::{
    BatchOperation, BatchResult, DataManager, DeleteOptions, Fetched, GetOptions, HealthCheck, WriteOptions,
};
pub use query::{Aggregation, AggregateValue, Direction, FilterOperator, QueryOptions};
pub use realtime::{ConnectionState, ListenerId, Snapshot};
pub use resilience::retry::{RetryConfig, RetryQueue};
pub use sanitize::{FieldType, Sanitizer, ValidationError};
pub use session::{FileSessionStore, SessionGuard, SessionStatus};
pub use storage::{DocumentStore, InMemoryStore, StorageError};
pub use metrics::LatencyTimer;
