// relay/errors.rs

use thiserror::Error;

/// Error types for bus operations
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Bus error: {0}")]
    Bus(String),

    #[error("Message of {size} bytes exceeds the {limit}-byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    #[error("Publish to {channel} failed after {attempts} attempts")]
    RetriesExhausted { channel: String, attempts: u32 },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<redis::RedisError> for RelayError {
    fn from(err: redis::RedisError) -> Self {
        RelayError::Bus(err.to_string())
    }
}

/// Result type for bus operations
pub type RelayResult<T> = Result<T, RelayError>;
