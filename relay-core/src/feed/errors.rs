// feed/errors.rs

use thiserror::Error;

/// Error types for upstream feed operations
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Data parsing error: {0}")]
    Parse(String),

    #[error("Control message, not trade data")]
    ControlMessage,
}

impl From<serde_json::Error> for FeedError {
    fn from(err: serde_json::Error) -> Self {
        FeedError::Parse(err.to_string())
    }
}
