//! Document data structure.
//!
//! A [`Document`] is the unit the data layer reads and writes. It is addressed
//! by `(collection, id)` and carries a flat map of caller fields plus the
//! system bookkeeping fields the facade maintains.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Caller-owned field map.
pub type Fields = Map<String, Value>;

/// Field names reserved for system bookkeeping. Callers cannot write these.
pub const SYSTEM_FIELDS: &[&str] = &[
    "id",
    "createdAt",
    "updatedAt",
    "createdBy",
    "updatedBy",
    "version",
    "deleted",
    "deletedAt",
];

/// Epoch milliseconds.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// A stored document.
///
/// # Example
///
/// ```
/// use crm_data::Document;
/// use serde_json::json;
///
/// let doc = Document::new("leads", "lead-1", json!({"name": "Sara"}).as_object().unwrap().clone());
/// assert_eq!(doc.version, 1);
/// assert_eq!(doc.str_field("name"), Some("Sara"));
/// assert_eq!(doc.field("id").unwrap().as_str(), Some("lead-1"));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub collection: String,
    pub id: String,
    pub fields: Fields,
    /// Creation timestamp (epoch millis)
    pub created_at: i64,
    /// Last update timestamp (epoch millis)
    pub updated_at: i64,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub updated_by: Option<String>,
    /// Starts at 1, +1 on every update
    pub version: u64,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

impl Document {
    /// Create a version-1 document stamped with the current time.
    pub fn new(collection: impl Into<String>, id: impl Into<String>, fields: Fields) -> Self {
        let now = now_millis();
        Self {
            collection: collection.into(),
            id: id.into(),
            fields,
            created_at: now,
            updated_at: now,
            created_by: None,
            updated_by: None,
            version: 1,
            deleted: false,
            deleted_at: None,
        }
    }

    /// Resolve a field by name, including system fields and dotted paths
    /// into nested objects (`"address.city"`).
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Cow<'_, Value>> {
        match name {
            "id" => Some(Cow::Owned(Value::String(self.id.clone()))),
            "createdAt" => Some(Cow::Owned(Value::from(self.created_at))),
            "updatedAt" => Some(Cow::Owned(Value::from(self.updated_at))),
            "createdBy" => self.created_by.clone().map(|v| Cow::Owned(Value::String(v))),
            "updatedBy" => self.updated_by.clone().map(|v| Cow::Owned(Value::String(v))),
            "version" => Some(Cow::Owned(Value::from(self.version))),
            "deleted" => Some(Cow::Owned(Value::Bool(self.deleted))),
            "deletedAt" => self.deleted_at.map(|v| Cow::Owned(Value::from(v))),
            path => {
                let mut parts = path.split('.');
                let mut current = self.fields.get(parts.next()?)?;
                for part in parts {
                    current = current.as_object()?.get(part)?;
                }
                Some(Cow::Borrowed(current))
            }
        }
    }

    /// Shortcut for string-valued caller fields.
    #[must_use]
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// Flatten into a single JSON object (caller fields + system fields).
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut out = self.fields.clone();
        out.insert("id".into(), Value::String(self.id.clone()));
        out.insert("createdAt".into(), Value::from(self.created_at));
        out.insert("updatedAt".into(), Value::from(self.updated_at));
        if let Some(ref by) = self.created_by {
            out.insert("createdBy".into(), Value::String(by.clone()));
        }
        if let Some(ref by) = self.updated_by {
            out.insert("updatedBy".into(), Value::String(by.clone()));
        }
        out.insert("version".into(), Value::from(self.version));
        if self.deleted {
            out.insert("deleted".into(), Value::Bool(true));
            if let Some(at) = self.deleted_at {
                out.insert("deletedAt".into(), Value::from(at));
            }
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_new_document_defaults() {
        let doc = Document::new("leads", "a", Fields::new());
        assert_eq!(doc.version, 1);
        assert!(!doc.deleted);
        assert_eq!(doc.created_at, doc.updated_at);
        assert!(doc.created_by.is_none());
    }

    #[test]
    fn test_system_field_lookup() {
        let mut doc = Document::new("leads", "a", Fields::new());
        doc.created_by = Some("u1".into());
        doc.version = 4;

        assert_eq!(doc.field("version").unwrap().as_u64(), Some(4));
        assert_eq!(doc.field("createdBy").unwrap().as_str(), Some("u1"));
        assert!(doc.field("updatedBy").is_none());
        assert!(doc.field("deletedAt").is_none());
    }

    #[test]
    fn test_nested_path_lookup() {
        let doc = Document::new(
            "leads",
            "a",
            fields(json!({"address": {"city": "Dubai", "geo": {"lat": 25.2}}})),
        );
        assert_eq!(doc.field("address.city").unwrap().as_str(), Some("Dubai"));
        assert_eq!(doc.field("address.geo.lat").unwrap().as_f64(), Some(25.2));
        assert!(doc.field("address.zip").is_none());
        assert!(doc.field("missing.path").is_none());
    }

    #[test]
    fn test_to_json_flattens() {
        let mut doc = Document::new("leads", "a", fields(json!({"name": "Omar"})));
        doc.deleted = true;
        doc.deleted_at = Some(42);

        let flat = doc.to_json();
        assert_eq!(flat["id"], "a");
        assert_eq!(flat["name"], "Omar");
        assert_eq!(flat["version"], 1);
        assert_eq!(flat["deleted"], true);
        assert_eq!(flat["deletedAt"], 42);
    }

    #[test]
    fn test_serde_roundtrip_uses_camel_case() {
        let doc = Document::new("users", "u1", fields(json!({"role": "admin"})));
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("deletedAt").is_none());

        let back: Document = serde_json::from_value(json).unwrap();
        assert_eq!(back, doc);
    }
}
