//! Configuration module for the crawl pipeline
//!
//! This module provides the `PipelineConfig` struct, its per-component
//! sub-configs and a type-safe builder with validation and sensible defaults.

// Sub-modules
pub mod builder;
pub mod getters;
pub mod types;

// Re-exports for public API
pub use builder::{PipelineConfigBuilder, WithCheckpointDir};
pub use types::{
    CheckpointConfig, CircuitBreakerConfig, ConcurrencyConfig, ConfigError, FeedbackConfig,
    ImportanceWeights, PipelineConfig, RetryPolicy,
};
