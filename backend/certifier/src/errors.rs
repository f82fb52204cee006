//! Service-level error types.

use co2_engine::CertificationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Storage failures reach the engine as its own `Storage` variant.
impl From<ServiceError> for CertificationError {
    fn from(e: ServiceError) -> Self {
        CertificationError::Storage(e.to_string())
    }
}
