//! Query evaluation over in-process document sets.
//!
//! Semantics follow the hosted document database the admin panel targets:
//! range comparisons only match values of the same type, `!=`/`not-in`
//! require the field to exist, and documents missing an `order_by` field are
//! left out of ordered results.

use std::cmp::Ordering;

use serde_json::Value;

use super::{Direction, Filter, FilterOperator, QueryOptions};
use crate::document::Document;
use crate::storage::StorageError;

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Compare two values of the same type. Returns `None` across types and for
/// objects.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                match compare_values(l, r)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(x.len().cmp(&y.len()))
        }
        _ => None,
    }
}

/// Total order used for sorting: type rank first, then value.
fn sort_order(a: &Value, b: &Value) -> Ordering {
    type_rank(a)
        .cmp(&type_rank(b))
        .then_with(|| compare_values(a, b).unwrap_or(Ordering::Equal))
}

impl Filter {
    /// Does `doc` satisfy this constraint?
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = doc.field(&self.field) else {
            return false;
        };
        let actual: &Value = &actual;
        let range = |wanted: &[Ordering]| {
            compare_values(actual, &self.value).is_some_and(|ord| wanted.contains(&ord))
        };

        match self.operator {
            FilterOperator::Eq => values_equal(actual, &self.value),
            FilterOperator::Ne => !values_equal(actual, &self.value),
            FilterOperator::Lt => range(&[Ordering::Less]),
            FilterOperator::Lte => range(&[Ordering::Less, Ordering::Equal]),
            FilterOperator::Gt => range(&[Ordering::Greater]),
            FilterOperator::Gte => range(&[Ordering::Greater, Ordering::Equal]),
            FilterOperator::In => self
                .value
                .as_array()
                .is_some_and(|list| list.iter().any(|v| values_equal(actual, v))),
            FilterOperator::NotIn => self
                .value
                .as_array()
                .is_some_and(|list| !list.iter().any(|v| values_equal(actual, v))),
            FilterOperator::ArrayContains => actual
                .as_array()
                .is_some_and(|items| items.iter().any(|v| values_equal(v, &self.value))),
            FilterOperator::ArrayContainsAny => match (actual.as_array(), self.value.as_array()) {
                (Some(items), Some(wanted)) => items
                    .iter()
                    .any(|item| wanted.iter().any(|w| values_equal(item, w))),
                _ => false,
            },
        }
    }
}

/// Filter, order and paginate `docs` according to `query`.
pub fn apply_query(docs: Vec<Document>, query: &QueryOptions) -> Result<Vec<Document>, StorageError> {
    for filter in &query.filters {
        if filter.operator.takes_list() && !filter.value.is_array() {
            return Err(StorageError::InvalidArgument(format!(
                "filter on '{}' with {:?} requires an array value",
                filter.field, filter.operator
            )));
        }
    }

    let mut matched: Vec<Document> = docs
        .into_iter()
        .filter(|doc| query.include_deleted || !doc.deleted)
        .filter(|doc| query.filters.iter().all(|f| f.matches(doc)))
        .filter(|doc| query.order_by.iter().all(|o| doc.field(&o.field).is_some()))
        .collect();

    matched.sort_by(|a, b| {
        for order in &query.order_by {
            let (Some(left), Some(right)) = (a.field(&order.field), b.field(&order.field)) else {
                continue;
            };
            let ord = sort_order(&left, &right);
            let ord = match order.direction {
                Direction::Ascending => ord,
                Direction::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.id.cmp(&b.id)
    });

    if let Some(ref cursor) = query.start_after {
        let Some(pos) = matched.iter().position(|d| &d.id == cursor) else {
            return Err(StorageError::InvalidArgument(format!(
                "cursor document '{}' is not part of the result set",
                cursor
            )));
        };
        matched.drain(..=pos);
    }

    if let Some(limit) = query.limit {
        matched.truncate(limit);
    }

    Ok(matched)
}
