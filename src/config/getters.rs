//! Getter methods for `PipelineConfig`

use std::path::Path;
use std::time::Duration;

use super::types::{
    CheckpointConfig, CircuitBreakerConfig, ConcurrencyConfig, FeedbackConfig, ImportanceWeights,
    PipelineConfig, RetryPolicy,
};

impl PipelineConfig {
    #[must_use]
    pub fn checkpoint_dir(&self) -> &Path {
        &self.checkpoint_dir
    }

    #[must_use]
    pub fn feedback_path(&self) -> &Path {
        &self.feedback_path
    }

    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    #[must_use]
    pub fn circuit_breaker(&self) -> &CircuitBreakerConfig {
        &self.circuit_breaker
    }

    #[must_use]
    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    #[must_use]
    pub fn concurrency(&self) -> &ConcurrencyConfig {
        &self.concurrency
    }

    #[must_use]
    pub fn checkpoint(&self) -> &CheckpointConfig {
        &self.checkpoint
    }

    #[must_use]
    pub fn feedback(&self) -> &FeedbackConfig {
        &self.feedback
    }

    #[must_use]
    pub fn importance(&self) -> &ImportanceWeights {
        &self.importance
    }

    #[must_use]
    pub fn max_circuit_wait(&self) -> Duration {
        self.max_circuit_wait
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
}
