//! Infrastructure Database Layer
//!
//! PostgreSQL persistence for the integration gateway, using SQLx:
//! - `PostgresSyncHistory`: durable, append-only sync reports
//! - `AdapterDescriptorRepository`: the adapter configuration fed to hot reload
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{create_pool, run_migrations, DatabaseConfig, PostgresSyncHistory};
//!
//! let pool = create_pool(DatabaseConfig::new("postgres://localhost/integration_gateway")).await?;
//! run_migrations(&pool).await?;
//! let history = PostgresSyncHistory::new(pool);
//! ```

pub mod pool;
pub mod error;
pub mod history;
pub mod descriptors;

pub use pool::{create_pool, ping, run_migrations, DatabaseConfig, DatabasePool};
pub use error::DatabaseError;
pub use history::PostgresSyncHistory;
pub use descriptors::AdapterDescriptorRepository;
