//! Test Utilities Crate
//!
//! Provides shared test infrastructure, fixtures, and helpers for the
//! integration layer test suite.
//!
//! # Modules
//!
//! - `doubles`: Scripted adapters, a factory-backed fleet, a recording alert sink
//! - `fixtures`: Pre-built test data for common entities and configurations
//! - `builders`: Builder patterns for descriptors and sync managers
//! - `database`: PostgreSQL test containers
//! - `assertions`: Custom assertion helpers for reports and breakers
//! - `generators`: Property-based test data generators

pub mod doubles;
pub mod fixtures;
pub mod builders;
pub mod database;
pub mod assertions;
pub mod generators;

pub use doubles::*;
pub use fixtures::*;
pub use builders::*;
pub use database::*;
pub use assertions::*;
pub use generators::*;
