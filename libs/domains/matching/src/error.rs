use core_config::ConfigError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MatchingError {
    #[error("Store error: {0}")]
    Store(String),

    #[error("Nearest-neighbor index error: {0}")]
    Index(String),

    #[error("Malformed neighbor row: {0}")]
    MalformedNeighbor(String),

    #[error("Invalid signal for image {image_id}: {reason}")]
    InvalidSignal { image_id: Uuid, reason: String },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type MatchingResult<T> = Result<T, MatchingError>;

impl From<sea_orm::DbErr> for MatchingError {
    fn from(err: sea_orm::DbErr) -> Self {
        MatchingError::Store(format!("Database error: {}", err))
    }
}

impl From<reqwest::Error> for MatchingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            MatchingError::Timeout(err.to_string())
        } else {
            MatchingError::Index(err.to_string())
        }
    }
}

impl From<serde_json::Error> for MatchingError {
    fn from(err: serde_json::Error) -> Self {
        MatchingError::Internal(format!("JSON error: {}", err))
    }
}

impl From<ConfigError> for MatchingError {
    fn from(err: ConfigError) -> Self {
        MatchingError::Config(err.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for MatchingError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        MatchingError::Timeout(err.to_string())
    }
}
