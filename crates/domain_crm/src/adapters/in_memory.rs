//! In-memory CRM adapter
//!
//! A self-contained provider used for local runs, demos and tests. It behaves
//! like a small CRM: it assigns its own ids, stamps modification times,
//! upserts contacts by email and enforces a per-second call budget.
//!
//! Provider-side normalization is emulated with per-field transforms
//! (`lowercase`, `uppercase`, `trim`) and fixed overrides, configured under
//! the descriptor's `settings`:
//!
//! ```json
//! {
//!   "id_prefix": "hs",
//!   "transforms": { "email": "lowercase" },
//!   "overrides": { "lifecycle_stage": "lead" }
//! }
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use core_kernel::{
    AdapterError, ConfigError, ContactSync, DealSync, NormalizedEntity, OperationMetadata,
    ProviderAdapter,
};
use domain_registry::AdapterDescriptor;

pub const PROVIDER_TYPE: &str = "in_memory_crm";

/// Provider-side rewrite of a string field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTransform {
    Lowercase,
    Uppercase,
    Trim,
}

impl FieldTransform {
    fn apply(&self, value: &Value) -> Value {
        match value.as_str() {
            Some(s) => Value::String(match self {
                FieldTransform::Lowercase => s.to_lowercase(),
                FieldTransform::Uppercase => s.to_uppercase(),
                FieldTransform::Trim => s.trim().to_string(),
            }),
            None => value.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InMemoryCrmSettings {
    pub id_prefix: Option<String>,
    pub transforms: BTreeMap<String, FieldTransform>,
    pub overrides: BTreeMap<String, Value>,
}

// Fixed one-second windows
#[derive(Debug)]
struct RateLimiter {
    limit: u32,
    window: Mutex<(Instant, u32)>,
}

impl RateLimiter {
    fn new(limit: u32) -> Self {
        Self {
            limit,
            window: Mutex::new((Instant::now(), 0)),
        }
    }

    fn admit(&self) -> Result<(), AdapterError> {
        let mut window = self.window.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(window.0);
        if elapsed >= Duration::from_secs(1) {
            *window = (now, 0);
        }
        if window.1 >= self.limit {
            let retry_after = Duration::from_secs(1).saturating_sub(now.duration_since(window.0));
            return Err(AdapterError::rate_limited(retry_after));
        }
        window.1 += 1;
        Ok(())
    }
}

#[derive(Debug)]
struct Collection {
    kind: &'static str,
    required: &'static str,
    natural_key: Option<&'static str>,
    records: RwLock<BTreeMap<String, NormalizedEntity>>,
}

impl Collection {
    fn new(kind: &'static str, required: &'static str, natural_key: Option<&'static str>) -> Self {
        Self {
            kind,
            required,
            natural_key,
            records: RwLock::new(BTreeMap::new()),
        }
    }

    fn check_required(&self, entity: &NormalizedEntity) -> Result<(), AdapterError> {
        match entity.str_field(self.required) {
            Some(value) if !value.trim().is_empty() => Ok(()),
            _ => Err(AdapterError::malformed(format!(
                "{} requires a non-empty '{}' field",
                self.kind, self.required
            ))),
        }
    }
}

#[derive(Debug)]
pub struct InMemoryCrmAdapter {
    id_prefix: String,
    settings: InMemoryCrmSettings,
    contacts: Collection,
    deals: Collection,
    next_id: AtomicU64,
    limiter: Option<RateLimiter>,
    available: AtomicBool,
}

impl InMemoryCrmAdapter {
    pub fn new(id_prefix: impl Into<String>) -> Self {
        Self {
            id_prefix: id_prefix.into(),
            settings: InMemoryCrmSettings::default(),
            contacts: Collection::new("contact", "email", Some("email")),
            deals: Collection::new("deal", "name", None),
            next_id: AtomicU64::new(1),
            limiter: None,
            available: AtomicBool::new(true),
        }
    }

    /// Builds the adapter from its descriptor's options and settings
    pub fn from_descriptor(descriptor: &AdapterDescriptor) -> Result<Self, ConfigError> {
        let settings: InMemoryCrmSettings = match &descriptor.options.settings {
            Value::Null => InMemoryCrmSettings::default(),
            value => serde_json::from_value(value.clone())
                .map_err(|e| ConfigError::invalid(&descriptor.id, e.to_string()))?,
        };
        let prefix = settings
            .id_prefix
            .clone()
            .unwrap_or_else(|| descriptor.id.to_string());

        let mut adapter = Self::new(prefix).with_settings(settings);
        if let Some(limit) = descriptor.options.rate_limit_per_second {
            adapter = adapter.with_rate_limit(limit);
        }
        Ok(adapter)
    }

    pub fn with_settings(mut self, settings: InMemoryCrmSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_rate_limit(mut self, per_second: u32) -> Self {
        self.limiter = Some(RateLimiter::new(per_second));
        self
    }

    /// Makes probes succeed or fail
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn contact_count(&self) -> usize {
        self.contacts.records.read().await.len()
    }

    pub async fn deal_count(&self) -> usize {
        self.deals.records.read().await.len()
    }

    pub async fn find_contact_by_email(&self, email: &str) -> Option<NormalizedEntity> {
        let email = email.to_lowercase();
        self.contacts
            .records
            .read()
            .await
            .values()
            .find(|c| c.str_field("email").map(str::to_lowercase).as_deref() == Some(email.as_str()))
            .cloned()
    }

    fn admit(&self) -> Result<(), AdapterError> {
        match &self.limiter {
            Some(limiter) => limiter.admit(),
            None => Ok(()),
        }
    }

    fn normalize(&self, mut entity: NormalizedEntity) -> NormalizedEntity {
        for (field, transform) in &self.settings.transforms {
            if let Some(value) = entity.fields.get_mut(field) {
                *value = transform.apply(value);
            }
        }
        for (field, value) in &self.settings.overrides {
            entity.fields.insert(field.clone(), value.clone());
        }
        entity.updated_at = Some(Utc::now());
        entity
    }

    async fn create(
        &self,
        collection: &Collection,
        payload: &NormalizedEntity,
    ) -> Result<NormalizedEntity, AdapterError> {
        collection.check_required(payload)?;
        let mut records = collection.records.write().await;
        self.insert_new(collection, &mut records, payload)
    }

    async fn update(
        &self,
        collection: &Collection,
        external_id: &str,
        payload: &NormalizedEntity,
    ) -> Result<NormalizedEntity, AdapterError> {
        let mut records = collection.records.write().await;
        self.merge_into(collection, &mut records, external_id, payload)
    }

    // Known external id first, then the natural key, otherwise create. One
    // write guard covers lookup and write so concurrent upserts of the same
    // natural key resolve to a single record.
    async fn upsert(
        &self,
        collection: &Collection,
        payload: &NormalizedEntity,
    ) -> Result<NormalizedEntity, AdapterError> {
        collection.check_required(payload)?;
        let mut records = collection.records.write().await;
        let existing = payload
            .external_id
            .as_ref()
            .filter(|id| records.contains_key(id.as_str()))
            .cloned()
            .or_else(|| {
                let key = collection.natural_key?;
                find_by_key(&records, key, &self.normalize(payload.clone()))
            });

        match existing {
            Some(id) => self.merge_into(collection, &mut records, &id, payload),
            None => self.insert_new(collection, &mut records, payload),
        }
    }

    fn insert_new(
        &self,
        collection: &Collection,
        records: &mut BTreeMap<String, NormalizedEntity>,
        payload: &NormalizedEntity,
    ) -> Result<NormalizedEntity, AdapterError> {
        let mut entity = self.normalize(payload.clone());
        if let Some(key) = collection.natural_key {
            if find_by_key(records, key, &entity).is_some() {
                return Err(AdapterError::permanent(format!(
                    "{} with this {} already exists",
                    collection.kind, key
                )));
            }
        }

        let id = format!("{}-{}", self.id_prefix, self.next_id.fetch_add(1, Ordering::SeqCst));
        entity.external_id = Some(id.clone());
        records.insert(id.clone(), entity.clone());
        debug!(external_id = %id, kind = collection.kind, "Record created");
        Ok(entity)
    }

    fn merge_into(
        &self,
        collection: &Collection,
        records: &mut BTreeMap<String, NormalizedEntity>,
        external_id: &str,
        payload: &NormalizedEntity,
    ) -> Result<NormalizedEntity, AdapterError> {
        let existing = records.get(external_id).ok_or_else(|| {
            AdapterError::permanent(format!("{} '{}' not found", collection.kind, external_id))
        })?;

        let mut merged = existing.clone();
        merged.fields.extend(payload.fields.clone());
        let mut entity = self.normalize(merged);
        entity.external_id = Some(external_id.to_string());
        records.insert(external_id.to_string(), entity.clone());
        Ok(entity)
    }
}

fn find_by_key(
    records: &BTreeMap<String, NormalizedEntity>,
    key: &str,
    entity: &NormalizedEntity,
) -> Option<String> {
    let wanted = entity.field(key)?;
    records
        .iter()
        .find(|(_, record)| record.field(key) == Some(wanted))
        .map(|(id, _)| id.clone())
}

#[async_trait]
impl ContactSync for InMemoryCrmAdapter {
    async fn create_contact(
        &self,
        contact: &NormalizedEntity,
        _metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.admit()?;
        self.create(&self.contacts, contact).await
    }

    async fn update_contact(
        &self,
        external_id: &str,
        contact: &NormalizedEntity,
        _metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.admit()?;
        self.update(&self.contacts, external_id, contact).await
    }

    async fn upsert_contact(
        &self,
        contact: &NormalizedEntity,
        _metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.admit()?;
        self.upsert(&self.contacts, contact).await
    }
}

#[async_trait]
impl DealSync for InMemoryCrmAdapter {
    async fn create_deal(
        &self,
        deal: &NormalizedEntity,
        _metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.admit()?;
        self.create(&self.deals, deal).await
    }

    async fn update_deal(
        &self,
        external_id: &str,
        deal: &NormalizedEntity,
        _metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.admit()?;
        self.update(&self.deals, external_id, deal).await
    }

    async fn upsert_deal(
        &self,
        deal: &NormalizedEntity,
        _metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.admit()?;
        self.upsert(&self.deals, deal).await
    }
}

#[async_trait]
impl ProviderAdapter for InMemoryCrmAdapter {
    fn provider_type(&self) -> &str {
        PROVIDER_TYPE
    }

    fn contact_sync(&self) -> Option<&dyn ContactSync> {
        Some(self)
    }

    fn deal_sync(&self) -> Option<&dyn DealSync> {
        Some(self)
    }

    async fn probe(&self) -> Result<(), AdapterError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AdapterError::transient("provider unavailable"))
        }
    }
}
