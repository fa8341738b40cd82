//! Aggregations over a filtered collection (dashboard counters, totals).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;

/// Aggregation kind
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "field", rename_all = "lowercase")]
pub enum Aggregation {
    Count,
    Sum(String),
    Average(String),
    Min(String),
    Max(String),
}

/// Aggregation result. Numeric aggregations over no numeric values are `None`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AggregateValue {
    Count(u64),
    Number(Option<f64>),
}

impl AggregateValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Count(n) => Some(*n as f64),
            Self::Number(n) => *n,
        }
    }
}

impl Aggregation {
    /// Stable label used in cache keys and logs
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::Count => "count".to_string(),
            Self::Sum(f) => format!("sum({})", f),
            Self::Average(f) => format!("avg({})", f),
            Self::Min(f) => format!("min({})", f),
            Self::Max(f) => format!("max({})", f),
        }
    }

    /// Evaluate over an already-filtered document set. Non-numeric values of
    /// the target field are skipped.
    #[must_use]
    pub fn evaluate(&self, docs: &[Document]) -> AggregateValue {
        let numbers = |field: &str| -> Vec<f64> {
            docs.iter()
                .filter_map(|d| d.field(field).and_then(|v| v.as_ref().as_f64()))
                .collect()
        };

        match self {
            Self::Count => AggregateValue::Count(docs.len() as u64),
            Self::Sum(field) => {
                let values = numbers(field);
                AggregateValue::Number(Some(values.iter().sum()))
            }
            Self::Average(field) => {
                let values = numbers(field);
                if values.is_empty() {
                    AggregateValue::Number(None)
                } else {
                    AggregateValue::Number(Some(values.iter().sum::<f64>() / values.len() as f64))
                }
            }
            Self::Min(field) => AggregateValue::Number(numbers(field).into_iter().reduce(f64::min)),
            Self::Max(field) => AggregateValue::Number(numbers(field).into_iter().reduce(f64::max)),
        }
    }
}

impl From<AggregateValue> for Value {
    fn from(value: AggregateValue) -> Self {
        match value {
            AggregateValue::Count(n) => Value::from(n),
            AggregateValue::Number(Some(n)) => Value::from(n),
            AggregateValue::Number(None) => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs() -> Vec<Document> {
        [json!({"price": 100}), json!({"price": 250.5}), json!({"price": "tbd"}), json!({})]
            .into_iter()
            .enumerate()
            .map(|(i, v)| Document::new("leads", i.to_string(), v.as_object().cloned().unwrap()))
            .collect()
    }

    #[test]
    fn test_count() {
        assert_eq!(Aggregation::Count.evaluate(&docs()), AggregateValue::Count(4));
    }

    #[test]
    fn test_sum_and_average_skip_non_numeric() {
        let sum = Aggregation::Sum("price".into()).evaluate(&docs());
        assert_eq!(sum, AggregateValue::Number(Some(350.5)));

        let avg = Aggregation::Average("price".into()).evaluate(&docs());
        assert_eq!(avg.as_f64(), Some(175.25));
    }

    #[test]
    fn test_min_max() {
        assert_eq!(Aggregation::Min("price".into()).evaluate(&docs()).as_f64(), Some(100.0));
        assert_eq!(Aggregation::Max("price".into()).evaluate(&docs()).as_f64(), Some(250.5));
    }

    #[test]
    fn test_empty_average_is_none() {
        let avg = Aggregation::Average("price".into()).evaluate(&[]);
        assert_eq!(avg, AggregateValue::Number(None));
        assert_eq!(Value::from(avg), Value::Null);
    }

    #[test]
    fn test_labels() {
        assert_eq!(Aggregation::Count.label(), "count");
        assert_eq!(Aggregation::Average("budget".into()).label(), "avg(budget)");
    }
}
