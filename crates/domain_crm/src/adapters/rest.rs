//! REST CRM adapter
//!
//! Talks to a JSON-over-HTTP CRM. The adapter owns the translation between
//! normalized entities and the provider's field names, and maps provider
//! responses onto the adapter error taxonomy:
//!
//! | Response                  | Error          |
//! |---------------------------|----------------|
//! | 400, 422                  | `Malformed`    |
//! | 401, 403                  | `AuthFailure`  |
//! | 404, 409, other 4xx       | `Permanent`    |
//! | 429                       | `RateLimited` (honours `Retry-After`) |
//! | 5xx, connection, timeout  | `Transient`    |
//!
//! Upserts address a record by the payload's `external_id`. Ids minted by
//! another provider are common in a fan-out, so a 404 on the update falls
//! back to creating the record. Ids are sent as a single percent-encoded path
//! segment.
//!
//! HTTP itself sits behind [`CrmTransport`] so the mapping can be exercised
//! without a network. [`HttpTransport`] is the reqwest-backed implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use core_kernel::{
    AdapterError, ConfigError, ContactSync, DealSync, NormalizedEntity, OperationMetadata,
    ProviderAdapter,
};
use domain_registry::{AdapterDescriptor, Credentials};

pub const PROVIDER_TYPE: &str = "rest_crm";

const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Patch => "PATCH",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    /// Path relative to the provider's base URL
    pub path: String,
    pub body: Option<Value>,
    /// Correlation id forwarded as `X-Correlation-Id`
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    /// `Value::Null` for an empty body
    pub body: Value,
}

impl TransportResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self {
            status,
            retry_after: None,
            body,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Failure to get any HTTP response
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid response body: {0}")]
    Body(String),
}

impl From<TransportError> for AdapterError {
    fn from(err: TransportError) -> Self {
        AdapterError::transient(err.to_string())
    }
}

/// Sends one request to the provider
#[async_trait]
pub trait CrmTransport: Send + Sync + 'static {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Provider layout, read from the descriptor's `settings`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestCrmConfig {
    pub base_url: String,
    pub contacts_path: String,
    pub deals_path: String,
    pub health_path: String,
    /// Normalized field name to provider field name; unmapped fields pass through
    pub field_map: BTreeMap<String, String>,
    /// Provider field holding the record id
    pub id_field: String,
    /// Provider field holding the modification time (RFC 3339)
    pub updated_at_field: Option<String>,
}

impl Default for RestCrmConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            contacts_path: "contacts".to_string(),
            deals_path: "deals".to_string(),
            health_path: "health".to_string(),
            field_map: BTreeMap::new(),
            id_field: "id".to_string(),
            updated_at_field: Some("updated_at".to_string()),
        }
    }
}

impl RestCrmConfig {
    pub fn from_descriptor(descriptor: &AdapterDescriptor) -> Result<Self, ConfigError> {
        let config: RestCrmConfig = serde_json::from_value(descriptor.options.settings.clone())
            .map_err(|e| ConfigError::invalid(&descriptor.id, e.to_string()))?;
        if config.base_url.trim().is_empty() {
            return Err(ConfigError::invalid(&descriptor.id, "settings.base_url is required"));
        }
        Ok(config)
    }
}

/// Reqwest-backed transport
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl HttpTransport {
    pub fn new(
        base_url: impl Into<String>,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

#[async_trait]
impl CrmTransport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let url = self.url(&request.path);
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&url),
            HttpMethod::Post => self.client.post(&url),
            HttpMethod::Patch => self.client.patch(&url),
        };
        if let Some(credentials) = &self.credentials {
            builder = builder.bearer_auth(credentials.expose());
        }
        if let Some(correlation_id) = &request.correlation_id {
            builder = builder.header("X-Correlation-Id", correlation_id);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else {
                TransportError::Connect(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.to_string()))?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| TransportError::Body(e.to_string()))?
        };

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}

/// Parses a `Retry-After` header value
///
/// Accepts both forms allowed by RFC 9110: delay seconds (`120`) and an
/// HTTP-date (`Wed, 21 Oct 2015 07:28:00 GMT`). A date in the past yields a
/// zero delay. Returns `None` for anything else.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

/// Encodes `external_id` as one path segment under `collection`
///
/// Returns `None` for ids that cannot name a record (`""`, `.`, `..`).
pub fn record_path(collection: &str, external_id: &str) -> Option<String> {
    if matches!(external_id, "" | "." | "..") {
        return None;
    }
    Some(format!(
        "{}/{}",
        collection.trim_end_matches('/'),
        urlencoding::encode(external_id)
    ))
}

/// Maps an unsuccessful response onto the adapter error taxonomy
pub fn error_for_response(response: &TransportResponse) -> AdapterError {
    let detail = response
        .body
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("provider returned {}", response.status));

    match response.status {
        400 | 422 => AdapterError::malformed(detail),
        401 | 403 => AdapterError::auth(detail),
        429 => AdapterError::rate_limited(response.retry_after.unwrap_or(DEFAULT_RETRY_AFTER)),
        500..=599 => AdapterError::transient(detail),
        _ => AdapterError::permanent(detail),
    }
}

pub struct RestCrmAdapter<T> {
    config: RestCrmConfig,
    transport: T,
}

impl<T: CrmTransport> RestCrmAdapter<T> {
    pub fn new(config: RestCrmConfig, transport: T) -> Self {
        Self { config, transport }
    }

    pub fn config(&self) -> &RestCrmConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Normalized entity to provider body
    pub fn to_provider(&self, entity: &NormalizedEntity) -> Value {
        let body: Map<String, Value> = entity
            .fields
            .iter()
            .map(|(name, value)| {
                let provider_name = self.config.field_map.get(name).unwrap_or(name);
                (provider_name.clone(), value.clone())
            })
            .collect();
        Value::Object(body)
    }

    /// Provider body to normalized entity
    pub fn from_provider(&self, body: &Value) -> Result<NormalizedEntity, AdapterError> {
        let object = body
            .as_object()
            .ok_or_else(|| AdapterError::malformed("provider response is not a JSON object"))?;

        let reverse: BTreeMap<&str, &str> = self
            .config
            .field_map
            .iter()
            .map(|(normalized, provider)| (provider.as_str(), normalized.as_str()))
            .collect();

        let mut entity = NormalizedEntity::new();
        for (name, value) in object {
            if name == &self.config.id_field {
                entity.external_id = match value {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                };
            } else if self.config.updated_at_field.as_deref() == Some(name.as_str()) {
                entity.updated_at = value
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|at| at.with_timezone(&Utc));
            } else {
                let normalized = reverse.get(name.as_str()).copied().unwrap_or(name.as_str());
                entity.fields.insert(normalized.to_string(), value.clone());
            }
        }
        Ok(entity)
    }

    async fn send(
        &self,
        method: HttpMethod,
        path: String,
        entity: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<TransportResponse, AdapterError> {
        let request = TransportRequest {
            method,
            path,
            body: Some(self.to_provider(entity)),
            correlation_id: metadata.correlation_id.clone(),
        };
        debug!(method = %request.method, path = %request.path, "Sending CRM request");

        Ok(self.transport.send(request).await?)
    }

    fn read(&self, response: TransportResponse) -> Result<NormalizedEntity, AdapterError> {
        if !response.is_success() {
            return Err(error_for_response(&response));
        }
        self.from_provider(&response.body)
    }

    async fn create(
        &self,
        collection: &str,
        entity: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        let response = self
            .send(HttpMethod::Post, collection.to_string(), entity, metadata)
            .await?;
        self.read(response)
    }

    async fn update(
        &self,
        collection: &str,
        external_id: &str,
        entity: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        let path = record_path(collection, external_id)
            .ok_or_else(|| AdapterError::malformed(format!("invalid external id '{}'", external_id)))?;
        let response = self.send(HttpMethod::Patch, path, entity, metadata).await?;
        self.read(response)
    }

    async fn upsert(
        &self,
        collection: &str,
        entity: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        let Some(path) = entity
            .external_id
            .as_deref()
            .and_then(|id| record_path(collection, id))
        else {
            return self.create(collection, entity, metadata).await;
        };

        let response = self.send(HttpMethod::Patch, path, entity, metadata).await?;
        if response.status == 404 {
            debug!(
                external_id = entity.external_id.as_deref().unwrap_or_default(),
                "Record unknown to provider, creating it"
            );
            return self.create(collection, entity, metadata).await;
        }
        self.read(response)
    }
}

impl<T> fmt::Debug for RestCrmAdapter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestCrmAdapter")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: CrmTransport> ContactSync for RestCrmAdapter<T> {
    async fn create_contact(
        &self,
        contact: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.create(&self.config.contacts_path, contact, metadata).await
    }

    async fn update_contact(
        &self,
        external_id: &str,
        contact: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.update(&self.config.contacts_path, external_id, contact, metadata).await
    }

    async fn upsert_contact(
        &self,
        contact: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.upsert(&self.config.contacts_path, contact, metadata).await
    }
}

#[async_trait]
impl<T: CrmTransport> DealSync for RestCrmAdapter<T> {
    async fn create_deal(
        &self,
        deal: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.create(&self.config.deals_path, deal, metadata).await
    }

    async fn update_deal(
        &self,
        external_id: &str,
        deal: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.update(&self.config.deals_path, external_id, deal, metadata).await
    }

    async fn upsert_deal(
        &self,
        deal: &NormalizedEntity,
        metadata: &OperationMetadata,
    ) -> Result<NormalizedEntity, AdapterError> {
        self.upsert(&self.config.deals_path, deal, metadata).await
    }
}

#[async_trait]
impl<T: CrmTransport> ProviderAdapter for RestCrmAdapter<T> {
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
        let response = self
            .transport
            .send(TransportRequest {
                method: HttpMethod::Get,
                path: self.config.health_path.clone(),
                body: None,
                correlation_id: None,
            })
            .await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(error_for_response(&response))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use core_kernel::{dispatch, AdapterErrorKind, Capability, EntityType};
    use domain_registry::AdapterOptions;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTransport {
        responses: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        requests: Mutex<Vec<TransportRequest>>,
    }

    impl FakeTransport {
        fn replying(responses: Vec<Result<TransportResponse, TransportError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::default(),
            }
        }

        fn requests(&self) -> Vec<TransportRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CrmTransport for FakeTransport {
        async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(TransportResponse::new(200, json!({}))))
        }
    }

    fn config() -> RestCrmConfig {
        RestCrmConfig {
            base_url: "https://crm.test/api".to_string(),
            field_map: BTreeMap::from([
                ("email".to_string(), "emailAddress".to_string()),
                ("name".to_string(), "fullName".to_string()),
            ]),
            id_field: "contactId".to_string(),
            updated_at_field: Some("modifiedAt".to_string()),
            ..Default::default()
        }
    }

    fn adapter(responses: Vec<Result<TransportResponse, TransportError>>) -> RestCrmAdapter<FakeTransport> {
        RestCrmAdapter::new(config(), FakeTransport::replying(responses))
    }

    fn contact() -> NormalizedEntity {
        NormalizedEntity::new()
            .with_field("email", "x@y.com")
            .with_field("name", "Ada")
    }

    async fn upsert_error(status: u16) -> AdapterError {
        let crm = adapter(vec![Ok(TransportResponse::new(status, json!({ "message": "nope" })))]);
        crm.upsert_contact(&contact(), &OperationMetadata::default())
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn test_create_maps_fields_both_ways() {
        let crm = adapter(vec![Ok(TransportResponse::new(
            201,
            json!({
                "contactId": 981,
                "emailAddress": "x@y.com",
                "fullName": "Ada",
                "modifiedAt": "2024-03-01T10:00:00Z"
            }),
        ))]);
        let metadata = OperationMetadata::with_correlation_id("booking-7");

        let created = crm.upsert_contact(&contact(), &metadata).await.unwrap();

        assert_eq!(created.external_id.as_deref(), Some("981"));
        assert_eq!(created.str_field("email"), Some("x@y.com"));
        assert_eq!(created.str_field("name"), Some("Ada"));
        assert_eq!(created.updated_at.map(|t| t.to_rfc3339()), Some("2024-03-01T10:00:00+00:00".to_string()));

        let requests = crm.transport().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, HttpMethod::Post);
        assert_eq!(requests[0].path, "contacts");
        assert_eq!(requests[0].body, Some(json!({ "emailAddress": "x@y.com", "fullName": "Ada" })));
        assert_eq!(requests[0].correlation_id.as_deref(), Some("booking-7"));
    }

    #[tokio::test]
    async fn test_update_uses_record_path() {
        let crm = adapter(vec![Ok(TransportResponse::new(200, json!({ "contactId": "c-1" })))]);

        let updated = dispatch(
            &crm,
            EntityType::Contact,
            &contact().with_external_id("c-1"),
            &OperationMetadata::default(),
        )
        .await
        .unwrap();

        assert_eq!(updated.external_id.as_deref(), Some("c-1"));
        let requests = crm.transport().requests();
        assert_eq!(requests[0].method, HttpMethod::Patch);
        assert_eq!(requests[0].path, "contacts/c-1");
    }

    #[tokio::test]
    async fn test_foreign_external_id_falls_back_to_create() {
        let crm = adapter(vec![
            Ok(TransportResponse::new(404, json!({ "message": "no such contact" }))),
            Ok(TransportResponse::new(201, json!({ "contactId": "c-77", "emailAddress": "x@y.com" }))),
        ]);

        let created = crm
            .upsert_contact(&contact().with_external_id("mem-42"), &OperationMetadata::default())
            .await
            .unwrap();

        assert_eq!(created.external_id.as_deref(), Some("c-77"));
        let requests = crm.transport().requests();
        assert_eq!(requests.len(), 2);
        assert_eq!((requests[0].method, requests[0].path.as_str()), (HttpMethod::Patch, "contacts/mem-42"));
        assert_eq!((requests[1].method, requests[1].path.as_str()), (HttpMethod::Post, "contacts"));
    }

    #[tokio::test]
    async fn test_deal_upsert_falls_back_to_create() {
        let crm = adapter(vec![
            Ok(TransportResponse::new(404, Value::Null)),
            Ok(TransportResponse::new(201, json!({ "contactId": "d-1" }))),
        ]);
        let deal = NormalizedEntity::new().with_field("stage", "won").with_external_id("hub-9");

        let created = dispatch(&crm, EntityType::Deal, &deal, &OperationMetadata::default())
            .await
            .unwrap();

        assert_eq!(created.external_id.as_deref(), Some("d-1"));
        assert_eq!(crm.transport().requests()[1].path, "deals");
    }

    #[tokio::test]
    async fn test_external_id_is_a_single_encoded_segment() {
        let crm = adapter(vec![Ok(TransportResponse::new(404, Value::Null))]);

        crm.upsert_contact(
            &contact().with_external_id("mem-42/../../admin"),
            &OperationMetadata::default(),
        )
        .await
        .unwrap();

        let requests = crm.transport().requests();
        assert_eq!(requests[0].path, "contacts/mem-42%2F..%2F..%2Fadmin");
        assert_eq!(requests[1].path, "contacts");
    }

    #[tokio::test]
    async fn test_dot_segment_ids_are_never_sent() {
        let crm = adapter(Vec::new());

        crm.upsert_contact(&contact().with_external_id(".."), &OperationMetadata::default())
            .await
            .unwrap();
        let error = crm
            .update_contact("..", &contact(), &OperationMetadata::default())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), AdapterErrorKind::Malformed);
        let requests = crm.transport().requests();
        assert_eq!(requests.len(), 1);
        assert_eq!((requests[0].method, requests[0].path.as_str()), (HttpMethod::Post, "contacts"));
    }

    #[tokio::test]
    async fn test_update_conflict_is_not_retried_as_create() {
        let crm = adapter(vec![Ok(TransportResponse::new(409, json!({ "message": "locked" })))]);

        let error = crm
            .upsert_contact(&contact().with_external_id("c-1"), &OperationMetadata::default())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), AdapterErrorKind::Permanent);
        assert_eq!(crm.transport().requests().len(), 1);
    }

    #[test]
    fn test_retry_after_forms() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 27, 0).unwrap();

        assert_eq!(parse_retry_after(" 120 ", now), Some(Duration::from_secs(120)));
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT", now),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            parse_retry_after("Wed, 21 Oct 2015 07:00:00 GMT", now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after("soon", now), None);
    }

    #[tokio::test]
    async fn test_status_mapping() {
        assert_eq!(upsert_error(400).await.kind(), AdapterErrorKind::Malformed);
        assert_eq!(upsert_error(422).await.kind(), AdapterErrorKind::Malformed);
        assert_eq!(upsert_error(401).await.kind(), AdapterErrorKind::AuthFailure);
        assert_eq!(upsert_error(403).await.kind(), AdapterErrorKind::AuthFailure);
        assert_eq!(upsert_error(404).await.kind(), AdapterErrorKind::Permanent);
        assert_eq!(upsert_error(409).await.kind(), AdapterErrorKind::Permanent);
        assert_eq!(upsert_error(500).await.kind(), AdapterErrorKind::Transient);
        assert_eq!(upsert_error(503).await.kind(), AdapterErrorKind::Transient);
        assert!(upsert_error(422).await.to_string().contains("nope"));
    }

    #[tokio::test]
    async fn test_rate_limited_honours_retry_after() {
        let crm = adapter(vec![Ok(
            TransportResponse::new(429, Value::Null).with_retry_after(Duration::from_secs(7))
        )]);

        let error = crm
            .upsert_contact(&contact(), &OperationMetadata::default())
            .await
            .unwrap_err();

        assert_eq!(error, AdapterError::rate_limited(Duration::from_secs(7)));
    }

    #[tokio::test]
    async fn test_transport_errors_are_transient() {
        let crm = adapter(vec![Err(TransportError::Timeout)]);

        let error = crm
            .upsert_contact(&contact(), &OperationMetadata::default())
            .await
            .unwrap_err();

        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn test_non_object_response_is_malformed() {
        let crm = adapter(vec![Ok(TransportResponse::new(200, json!(["unexpected"])))]);

        let error = crm
            .upsert_contact(&contact(), &OperationMetadata::default())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), AdapterErrorKind::Malformed);
    }

    #[tokio::test]
    async fn test_probe() {
        let crm = adapter(vec![
            Ok(TransportResponse::new(204, Value::Null)),
            Ok(TransportResponse::new(503, Value::Null)),
        ]);

        assert!(crm.probe().await.is_ok());
        assert!(crm.probe().await.unwrap_err().is_retryable());
        assert_eq!(crm.transport().requests()[0].path, "health");
    }

    #[test]
    fn test_config_requires_base_url() {
        let descriptor = AdapterDescriptor::new("crm-b", PROVIDER_TYPE, [Capability::ContactSync]);
        assert!(matches!(
            RestCrmConfig::from_descriptor(&descriptor),
            Err(ConfigError::Invalid { .. })
        ));

        let descriptor = descriptor.with_options(AdapterOptions {
            settings: json!({ "base_url": "https://crm.test", "contacts_path": "v2/people" }),
            ..Default::default()
        });
        let config = RestCrmConfig::from_descriptor(&descriptor).unwrap();
        assert_eq!(config.contacts_path, "v2/people");
        assert_eq!(config.id_field, "id");
    }

    #[test]
    fn test_http_transport_joins_urls() {
        let transport =
            HttpTransport::new("https://crm.test/api/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(transport.url("/contacts"), "https://crm.test/api/contacts");
    }
}
