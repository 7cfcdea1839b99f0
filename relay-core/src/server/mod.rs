// server/mod.rs
pub mod session;
pub mod ws;

// Re-export main interfaces for easy access
pub use session::SessionRegistry;
pub use ws::DownstreamServer;

use thiserror::Error;

/// Error types for the downstream server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Bind error: {0}")]
    Bind(#[from] std::io::Error),
}
