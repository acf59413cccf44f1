//! Request handlers

pub mod health;
pub mod sync;
pub mod adapters;
