use thiserror::Error;

use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The doctor's counter advanced to `token` but no queue entry was written.
    #[error("Token {token} for doctor {doctor_id} was issued without a queue entry: {reason}")]
    PartialAdmission {
        doctor_id: String,
        token: u64,
        reason: String,
    },

    #[error("Queue entry not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },
}

impl From<anyhow::Error> for QueueError {
    fn from(err: anyhow::Error) -> Self {
        QueueError::Persistence(err.to_string())
    }
}

impl From<redis::RedisError> for QueueError {
    fn from(err: redis::RedisError) -> Self {
        QueueError::Persistence(format!("Redis error: {}", err))
    }
}

impl From<deadpool_redis::PoolError> for QueueError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        QueueError::Persistence(format!("Redis pool error: {}", err))
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        QueueError::Persistence(format!("Malformed record: {}", err))
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Validation(msg) => AppError::ValidationError(msg),
            QueueError::NotFound(msg) => AppError::NotFound(msg),
            QueueError::InvalidStatusTransition { .. } => AppError::Conflict(err.to_string()),
            QueueError::Persistence(_) | QueueError::PartialAdmission { .. } => {
                AppError::Database("Storage operation failed".to_string())
            }
        }
    }
}
