//! Field rules per collection.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use super::{EnumField, FieldType};
use crate::collections;

/// Whether a write creates a document or patches one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    Create,
    Update,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldRule {
    pub field_type: FieldType,
    pub required: bool,
    /// Applied on create when the field is missing or blank
    pub default: Option<Value>,
}

impl FieldRule {
    #[must_use]
    pub fn optional(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            default: None,
        }
    }

    #[must_use]
    pub fn required(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: true,
            default: None,
        }
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Known fields of one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    pub collection: String,
    fields: BTreeMap<String, FieldRule>,
}

impl CollectionSchema {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            fields: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.insert(name.into(), rule);
        self
    }

    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&FieldRule> {
        self.fields.get(name)
    }

    pub fn rules(&self) -> impl Iterator<Item = (&String, &FieldRule)> {
        self.fields.iter()
    }

    /// Lead records
    #[must_use]
    pub fn leads() -> Self {
        Self::new(collections::LEADS)
            .field("name", FieldRule::required(FieldType::Name))
            .field("phone", FieldRule::required(FieldType::Phone))
            .field("email", FieldRule::optional(FieldType::Email))
            .field(
                "status",
                FieldRule::optional(FieldType::Select(EnumField::Status)).with_default("newLead"),
            )
            .field("source", FieldRule::optional(FieldType::Select(EnumField::Source)))
            .field("propertyType", FieldRule::optional(FieldType::Select(EnumField::PropertyType)))
            .field("budget", FieldRule::optional(FieldType::Select(EnumField::Budget)))
            .field(
                "priority",
                FieldRule::optional(FieldType::Select(EnumField::Priority)).with_default("medium"),
            )
            .field("notes", FieldRule::optional(FieldType::Multiline))
            .field("assignedTo", FieldRule::optional(FieldType::Id))
    }

    /// Panel users
    #[must_use]
    pub fn users() -> Self {
        Self::new(collections::USERS)
            .field("name", FieldRule::required(FieldType::Name))
            .field("email", FieldRule::required(FieldType::Email))
            .field("phone", FieldRule::optional(FieldType::Phone))
            .field("role", FieldRule::required(FieldType::Select(EnumField::Role)))
            .field("masterId", FieldRule::optional(FieldType::Id))
    }
}

/// Schemas by collection name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, CollectionSchema>,
}

impl SchemaRegistry {
    /// Empty registry: every collection gets generic markup stripping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lead and user schemas
    #[must_use]
    pub fn crm_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(CollectionSchema::leads());
        registry.register(CollectionSchema::users());
        registry
    }

    /// Add or replace the schema for its collection
    pub fn register(&mut self, schema: CollectionSchema) {
        self.schemas.insert(schema.collection.clone(), schema);
    }

    #[must_use]
    pub fn get(&self, collection: &str) -> Option<&CollectionSchema> {
        self.schemas.get(collection)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
