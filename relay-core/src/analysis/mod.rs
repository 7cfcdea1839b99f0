// analysis/mod.rs
pub mod engine;

// Re-export main interfaces for easy access
pub use engine::{AnalysisConfig, AnalysisEngine};
