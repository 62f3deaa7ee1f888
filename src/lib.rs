//! Pruner library exports

pub mod config;
pub mod error;
pub mod lease;
pub mod lock;
pub mod orchestrator;
pub mod routes;
pub mod store;
