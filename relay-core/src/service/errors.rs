//! Service layer error types.

use thiserror::Error;

use crate::feed::FeedError;
use crate::relay::RelayError;
use crate::server::ServerError;
use relay_common::data::types::DataError;

/// Service layer error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Task error: {0}")]
    Task(String),
}

/// Result type for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
