//! Normalized, provider-agnostic entities
//!
//! Every adapter accepts and returns the integration layer's own schema.
//! Translating to and from a provider's wire format is the adapter's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// The kind of business entity carried by a sync operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Contact,
    Deal,
    Payment,
}

impl EntityType {
    /// Returns the canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Contact => "contact",
            EntityType::Deal => "deal",
            EntityType::Payment => "payment",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contact" => Ok(EntityType::Contact),
            "deal" => Ok(EntityType::Deal),
            "payment" => Ok(EntityType::Payment),
            other => Err(format!("unknown entity type '{}'", other)),
        }
    }
}

/// A provider-agnostic record
///
/// `fields` uses a `BTreeMap` so iteration order, serialization and
/// field-by-field comparison are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEntity {
    /// Identifier assigned by the provider, if the entity exists there
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Normalized field values
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,

    /// Provider-side last modification time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl NormalizedEntity {
    /// Creates an empty entity
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field value
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Sets the provider-assigned id
    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    /// Sets the provider-side modification time
    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.updated_at = Some(at);
        self
    }

    /// Returns a field value
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Returns a field as a string slice if it is a JSON string
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }
}
