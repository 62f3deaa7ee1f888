//! Application error types and handling

use crate::store::StoreKind;
use thiserror::Error;

/// Application error types
#[derive(Debug, Error)]
pub enum PrunerError {
    #[error("failed to open config file: {0}")]
    ConfigOpen(String),

    #[error("failed to read config file: {0}")]
    ConfigParse(String),

    #[error("failed to validate configuration: {0}")]
    ConfigValidate(String),

    #[error("failed to connect {kind} db: {source}")]
    StoreConnect {
        kind: StoreKind,
        #[source]
        source: sqlx::Error,
    },

    #[error("failed to connect lock db: {0}")]
    LockConnect(#[source] sqlx::Error),

    #[error("lease backend error: {0}")]
    Lease(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type alias using PrunerError
pub type Result<T> = std::result::Result<T, PrunerError>;

impl From<serde_yaml::Error> for PrunerError {
    fn from(err: serde_yaml::Error) -> Self {
        PrunerError::ConfigParse(err.to_string())
    }
}
