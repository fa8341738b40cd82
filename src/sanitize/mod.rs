// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Input sanitization and validation.
//!
//! Every value written through the data manager passes through here first.
//! Sanitization never fails: it strips markup and script-bearing substrings,
//! filters the value down to the characters its [`FieldType`] allows and
//! truncates to the type's maximum length. Validation then checks the shape
//! of what is left.
//!
//! Enum (select) fields are the exception to "reject bad input": a value
//! outside the allow-list is coerced to an empty string, not rejected.
//!
//! # Example
//!
//! ```
//! use crm_data::sanitize::{FieldType, Sanitizer, SchemaRegistry};
//!
//! let sanitizer = Sanitizer::new(SchemaRegistry::crm_defaults());
//! assert_eq!(sanitizer.sanitize("<script>alert(1)</script>John", FieldType::Name), "alertJohn");
//!
//! let check = sanitizer.validate("abc", FieldType::Phone, true);
//! assert!(!check.valid);
//! ```

mod rules;
mod schema;

pub use rules::strip_markup;
pub use schema::{CollectionSchema, FieldRule, SchemaRegistry, WriteMode};

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::document::{Fields, SYSTEM_FIELDS};

/// Enumerated fields with fixed allow-lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EnumField {
    Status,
    Source,
    PropertyType,
    Budget,
    Priority,
    Role,
}

impl EnumField {
    #[must_use]
    pub fn allowed(&self) -> &'static [&'static str] {
        match self {
            EnumField::Status => &[
                "newLead",
                "contacted",
                "qualified",
                "meetingScheduled",
                "negotiation",
                "closedWon",
                "closedLost",
                "notInterested",
            ],
            EnumField::Source => &[
                "website",
                "facebook",
                "instagram",
                "google",
                "referral",
                "walkIn",
                "phoneCall",
                "exhibition",
                "other",
            ],
            EnumField::PropertyType => &[
                "apartment",
                "villa",
                "townhouse",
                "penthouse",
                "studio",
                "duplex",
                "land",
                "commercial",
            ],
            EnumField::Budget => &["under1m", "1m-2m", "2m-5m", "5m-10m", "over10m"],
            EnumField::Priority => &["low", "medium", "high", "urgent"],
            EnumField::Role => &["admin", "master", "user"],
        }
    }

    #[must_use]
    pub fn allows(&self, value: &str) -> bool {
        self.allowed().contains(&value)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnumField::Status => "status",
            EnumField::Source => "source",
            EnumField::PropertyType => "property type",
            EnumField::Budget => "budget",
            EnumField::Priority => "priority",
            EnumField::Role => "role",
        }
    }
}

/// How a field's value is cleaned and checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldType {
    Name,
    Email,
    Phone,
    Text,
    Multiline,
    Number,
    Select(EnumField),
    Id,
}

impl FieldType {
    /// Maximum length in characters
    #[must_use]
    pub fn max_len(&self) -> usize {
        match self {
            FieldType::Name => 100,
            FieldType::Email => 254,
            FieldType::Phone => 20,
            FieldType::Text => 500,
            FieldType::Multiline => 2000,
            FieldType::Number => 20,
            FieldType::Select(_) => 50,
            FieldType::Id => 128,
        }
    }
}

/// Result of [`Sanitizer::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub message: Option<String>,
}

impl Validation {
    #[must_use]
    pub fn ok() -> Self {
        Self { valid: true, message: None }
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: Some(message.into()),
        }
    }
}

/// A rejected field
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[error("{field}: {message}")]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A write rejected before reaching the store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Validation failed: {}", join_errors(.errors))]
pub struct ValidationError {
    pub errors: Vec<FieldError>,
}

fn join_errors(errors: &[FieldError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl ValidationError {
    #[must_use]
    pub fn single(error: FieldError) -> Self {
        Self { errors: vec![error] }
    }

    /// Names of the rejected fields
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|e| e.field.as_str())
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Create => f.write_str("create"),
            WriteMode::Update => f.write_str("update"),
        }
    }
}

/// Sanitizes and validates writes against the registered collection schemas.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    schemas: SchemaRegistry,
}

impl Sanitizer {
    #[must_use]
    pub fn new(schemas: SchemaRegistry) -> Self {
        Self { schemas }
    }

    #[must_use]
    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Clean `value` for `field_type`.
    #[must_use]
    pub fn sanitize(&self, value: &str, field_type: FieldType) -> String {
        let cleaned = rules::sanitize(value, field_type);
        if let FieldType::Select(field) = field_type {
            if cleaned.is_empty() && !value.trim().is_empty() {
                warn!(field = field.as_str(), value = %value, "Unknown enum value coerced to empty");
            }
        }
        cleaned
    }

    /// Check `value` (expected to be sanitized already).
    #[must_use]
    pub fn validate(&self, value: &str, field_type: FieldType, required: bool) -> Validation {
        let value = value.trim();
        if value.is_empty() {
            return if required {
                Validation::invalid("This field is required")
            } else {
                Validation::ok()
            };
        }
        match rules::check_shape(value, field_type) {
            Ok(()) => Validation::ok(),
            Err(message) => Validation::invalid(message),
        }
    }

    /// Sanitize then validate a single raw value.
    pub fn clean(&self, field: &str, raw: &str, field_type: FieldType, required: bool) -> Result<String, FieldError> {
        let cleaned = self.sanitize(raw, field_type);

        // Input that had content but sanitized to nothing was not a value of
        // this type at all. Enum coercion is the one silent case.
        if cleaned.is_empty() && !raw.trim().is_empty() && !matches!(field_type, FieldType::Select(_)) {
            let message = rules::check_shape(raw.trim(), field_type)
                .err()
                .unwrap_or_else(|| "Contains no valid characters".to_string());
            return Err(FieldError::new(field, message));
        }

        let check = self.validate(&cleaned, field_type, required);
        if check.valid {
            Ok(cleaned)
        } else {
            Err(FieldError::new(
                field,
                check.message.unwrap_or_else(|| "Invalid value".to_string()),
            ))
        }
    }

    /// Sanitize a write's field map for `collection`.
    ///
    /// System fields are dropped. For collections with a schema, unknown
    /// fields are dropped and each known field is cleaned per its rule; on
    /// [`WriteMode::Create`] missing fields take their defaults and missing
    /// required fields are errors. Collections without a schema get markup
    /// stripped from every string.
    pub fn sanitize_fields(&self, collection: &str, fields: &Fields, mode: WriteMode) -> Result<Fields, ValidationError> {
        let Some(schema) = self.schemas.get(collection) else {
            return Ok(fields
                .iter()
                .filter(|(name, _)| !SYSTEM_FIELDS.contains(&name.as_str()))
                .map(|(name, value)| (name.clone(), strip_value(value)))
                .collect());
        };

        let mut out = Fields::new();
        let mut errors = Vec::new();

        for (name, value) in fields {
            if SYSTEM_FIELDS.contains(&name.as_str()) {
                debug!(collection, field = %name, "Dropping system field from write");
                continue;
            }
            let Some(rule) = schema.rule(name) else {
                debug!(collection, field = %name, "Dropping unknown field");
                continue;
            };
            match self.clean_value(name, value, rule, mode) {
                Ok(Some(cleaned)) => {
                    out.insert(name.clone(), cleaned);
                }
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }

        if mode == WriteMode::Create {
            for (name, rule) in schema.rules() {
                if out.get(name).is_some_and(|v| !is_blank(v)) || errors.iter().any(|e| e.field == *name) {
                    continue;
                }
                if let Some(ref default) = rule.default {
                    out.insert(name.clone(), default.clone());
                } else if rule.required {
                    errors.push(FieldError::new(name.as_str(), "This field is required"));
                }
            }
        }

        if errors.is_empty() {
            Ok(out)
        } else {
            Err(ValidationError { errors })
        }
    }

    fn clean_value(&self, name: &str, value: &Value, rule: &FieldRule, mode: WriteMode) -> Result<Option<Value>, FieldError> {
        let raw = match value {
            Value::Null => {
                return match mode {
                    WriteMode::Update if rule.required => Err(FieldError::new(name, "This field is required")),
                    WriteMode::Update => Ok(Some(Value::Null)),
                    WriteMode::Create => Ok(None),
                };
            }
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(FieldError::new(name, "Must be a single value"));
            }
        };

        // Required-ness on create is settled after defaults are applied
        let required_now = rule.required && mode == WriteMode::Update;
        let cleaned = self.clean(name, &raw, rule.field_type, required_now)?;

        if cleaned.is_empty() && rule.required {
            return Ok(None);
        }
        if rule.field_type == FieldType::Number && !cleaned.is_empty() {
            if let Ok(n) = cleaned.parse::<i64>() {
                return Ok(Some(Value::from(n)));
            }
            if let Some(n) = cleaned.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
                return Ok(Some(Value::Number(n)));
            }
        }
        Ok(Some(Value::String(cleaned)))
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn strip_value(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(strip_markup(s).trim().to_string()),
        Value::Array(items) => Value::Array(items.iter().map(strip_value).collect()),
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), strip_value(v))).collect()),
        other => other.clone(),
    }
}
