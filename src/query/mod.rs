// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query options for collection reads.
//!
//! A [`QueryOptions`] value carries filters, ordering and pagination for a
//! collection read. It is the input to [`DocumentStore::query`] and, through
//! its canonical serialization, part of the cache key for the read.
//!
//! # Example
//!
//! ```rust
//! use crm_data::query::{QueryOptions, FilterOperator, Direction};
//! use serde_json::json;
//!
//! let query = QueryOptions::new()
//!     .where_eq("status", "newLead")
//!     .filter("budget", FilterOperator::In, json!(["1m-2m", "2m-5m"]))
//!     .order_by("createdAt", Direction::Descending)
//!     .limit(25);
//!
//! assert_eq!(query.filters.len(), 2);
//! ```
//!
//! [`DocumentStore::query`]: crate::storage::DocumentStore::query

mod aggregate;
mod eval;

pub use aggregate::{Aggregation, AggregateValue};
pub use eval::{apply_query, compare_values};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Filter comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterOperator {
    /// field == value
    Eq,
    /// field != value (field must exist)
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    /// field is one of `value` (array)
    In,
    /// field exists and is none of `value` (array)
    NotIn,
    /// array field contains `value`
    ArrayContains,
    /// array field contains any of `value` (array)
    ArrayContainsAny,
}

impl FilterOperator {
    /// Operators whose value must be a JSON array.
    #[must_use]
    pub fn takes_list(self) -> bool {
        matches!(self, Self::In | Self::NotIn | Self::ArrayContainsAny)
    }
}

/// One field constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: Value,
}

impl Filter {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "asc")]
    Ascending,
    #[serde(rename = "desc")]
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Filters, ordering and pagination for a collection read.
///
/// Results are ordered by `order_by` (ties broken by document id). With no
/// ordering, documents come back in id order. `start_after` is a document id
/// cursor: results begin after that document in the ordered result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub order_by: Vec<OrderBy>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub start_after: Option<String>,
    /// Include soft-deleted documents
    #[serde(default)]
    pub include_deleted: bool,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a constraint
    pub fn filter(mut self, field: impl Into<String>, operator: FilterOperator, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::new(field, operator, value));
        self
    }

    /// Add an equality constraint
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(field, FilterOperator::Eq, value)
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn start_after(mut self, document_id: impl Into<String>) -> Self {
        self.start_after = Some(document_id.into());
        self
    }

    pub fn include_deleted(mut self, include: bool) -> Self {
        self.include_deleted = include;
        self
    }

    /// Deterministic serialization used in cache and listener keys.
    ///
    /// Filters are a conjunction, so their order does not matter: they are
    /// sorted before serializing. Ordering clauses keep their order.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        let mut canonical = self.clone();
        canonical.filters.sort_by(|a, b| {
            a.field
                .cmp(&b.field)
                .then(a.operator.cmp(&b.operator))
                .then_with(|| a.value.to_string().cmp(&b.value.to_string()))
        });
        // serde_json maps are BTreeMap-backed, so nested values serialize sorted
        serde_json::to_string(&canonical).unwrap_or_default()
    }
}
