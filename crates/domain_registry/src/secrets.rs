//! Credential resolution
//!
//! Descriptors never carry secrets. They name a reference which the secret
//! store turns into [`Credentials`] when the adapter is instantiated.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

/// Resolved provider credentials
///
/// The secret is redacted from `Debug` output so descriptors and handles can
/// be logged freely.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    secret: String,
}

impl Credentials {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Returns the secret value for building request headers
    pub fn expose(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SecretError {
    #[error("No secret stored under '{0}'")]
    NotFound(String),

    #[error("Secret '{0}' is empty")]
    Empty(String),
}

/// Source of adapter credentials
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn resolve(&self, reference: &str) -> Result<Credentials, SecretError>;
}

/// Reads credentials from environment variables named by the reference
#[derive(Debug, Clone, Default)]
pub struct EnvSecretStore {
    prefix: Option<String>,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends `prefix` to every reference before the lookup
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn variable_name(&self, reference: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}{reference}"),
            None => reference.to_string(),
        }
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn resolve(&self, reference: &str) -> Result<Credentials, SecretError> {
        let name = self.variable_name(reference);
        let value = std::env::var(&name).map_err(|_| SecretError::NotFound(name.clone()))?;
        if value.trim().is_empty() {
            return Err(SecretError::Empty(name));
        }
        Ok(Credentials::new(value))
    }
}

/// Fixed in-memory secrets, for tests and local runs
#[derive(Debug, Clone, Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, Credentials>,
}

impl StaticSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, reference: impl Into<String>, secret: impl Into<String>) -> Self {
        self.secrets.insert(reference.into(), Credentials::new(secret));
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn resolve(&self, reference: &str) -> Result<Credentials, SecretError> {
        self.secrets
            .get(reference)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(reference.to_string()))
    }
}
