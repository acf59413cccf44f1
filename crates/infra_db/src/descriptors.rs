//! Adapter configuration repository
//!
//! Stores the registry configuration as one JSONB document per adapter,
//! ordered by position. A replacement is written in a single transaction so
//! a reader never loads half of an old and half of a new configuration.

use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::{info, instrument};

use domain_registry::{AdapterDescriptor, RegistryConfig};

use crate::error::DatabaseError;

#[derive(Debug, FromRow)]
struct DescriptorRow {
    descriptor: Json<AdapterDescriptor>,
}

/// Repository for the persisted adapter configuration
#[derive(Debug, Clone)]
pub struct AdapterDescriptorRepository {
    pool: PgPool,
}

impl AdapterDescriptorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Loads the stored configuration in its original adapter order
    pub async fn load_config(&self) -> Result<RegistryConfig, DatabaseError> {
        let rows = sqlx::query_as::<_, DescriptorRow>(
            "SELECT descriptor FROM adapter_descriptors ORDER BY position",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(RegistryConfig::new(
            rows.into_iter().map(|row| row.descriptor.0).collect(),
        ))
    }

    /// Loads one adapter's descriptor
    pub async fn get(&self, adapter_id: &str) -> Result<AdapterDescriptor, DatabaseError> {
        let row = sqlx::query_as::<_, DescriptorRow>(
            "SELECT descriptor FROM adapter_descriptors WHERE adapter_id = $1",
        )
        .bind(adapter_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row.descriptor.0)
            .ok_or_else(|| DatabaseError::not_found("AdapterDescriptor", adapter_id))
    }

    /// Replaces the stored configuration with `config`
    ///
    /// Either every descriptor is written or, on any error, the previous
    /// configuration is kept.
    #[instrument(skip(self, config), fields(adapters = config.adapters.len()))]
    pub async fn replace_config(&self, config: &RegistryConfig) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM adapter_descriptors")
            .execute(&mut *tx)
            .await?;

        for (position, descriptor) in config.adapters.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO adapter_descriptors (
                    adapter_id, position, provider_type, descriptor, updated_at
                ) VALUES ($1, $2, $3, $4, NOW())
                "#,
            )
            .bind(descriptor.id.as_str())
            .bind(position as i32)
            .bind(descriptor.provider_type.as_str())
            .bind(Json(descriptor))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("Adapter configuration persisted");
        Ok(())
    }
}
