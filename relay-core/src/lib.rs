// relay-core: trade stream relay service.
// Shared data types are in the relay-common crate.

pub mod analysis;
pub mod config;
pub mod feed;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod service;
