//! Type-safe builder for `PipelineConfig` using the typestate pattern
//!
//! The checkpoint directory is the only required field; `build()` does not
//! exist until it has been set.

use std::marker::PhantomData;
use std::path::PathBuf;
use std::time::Duration;

use super::types::{
    CheckpointConfig, CircuitBreakerConfig, ConcurrencyConfig, ConfigError, FeedbackConfig,
    ImportanceWeights, PipelineConfig, RetryPolicy,
};
use crate::utils::{
    DEFAULT_MAX_CIRCUIT_WAIT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_USER_AGENT,
    DEFAULT_VALIDATION_STAGE,
};

/// File name of the feedback store when no explicit path is given
const DEFAULT_FEEDBACK_FILE: &str = "feedback.json";

// Type states for the builder
pub struct WithCheckpointDir;

pub struct PipelineConfigBuilder<State = ()> {
    pub(crate) checkpoint_dir: Option<PathBuf>,
    pub(crate) feedback_path: Option<PathBuf>,
    pub(crate) stage_name: String,
    pub(crate) circuit_breaker: CircuitBreakerConfig,
    pub(crate) retry: RetryPolicy,
    pub(crate) concurrency: ConcurrencyConfig,
    pub(crate) checkpoint: CheckpointConfig,
    pub(crate) feedback: FeedbackConfig,
    pub(crate) importance: ImportanceWeights,
    pub(crate) max_circuit_wait: Duration,
    pub(crate) request_timeout: Duration,
    pub(crate) user_agent: String,
    pub(crate) _phantom: PhantomData<State>,
}

impl Default for PipelineConfigBuilder<()> {
    fn default() -> Self {
        Self {
            checkpoint_dir: None,
            feedback_path: None,
            stage_name: DEFAULT_VALIDATION_STAGE.to_string(),
            circuit_breaker: CircuitBreakerConfig::default(),
            retry: RetryPolicy::default(),
            concurrency: ConcurrencyConfig::default(),
            checkpoint: CheckpointConfig::default(),
            feedback: FeedbackConfig::default(),
            importance: ImportanceWeights::default(),
            max_circuit_wait: DEFAULT_MAX_CIRCUIT_WAIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            _phantom: PhantomData,
        }
    }
}

impl PipelineConfig {
    /// Create a builder for configuring a `PipelineConfig` with a fluent interface
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder<()> {
        PipelineConfigBuilder::default()
    }

    /// Same configuration for a differently named stage
    ///
    /// The name is checked by [`PipelineConfig::validate`].
    #[must_use]
    pub fn with_stage_name(mut self, name: impl Into<String>) -> Self {
        self.stage_name = name.into();
        self
    }
}

impl PipelineConfigBuilder<()> {
    pub fn checkpoint_dir(
        self,
        dir: impl Into<PathBuf>,
    ) -> PipelineConfigBuilder<WithCheckpointDir> {
        PipelineConfigBuilder {
            checkpoint_dir: Some(dir.into()),
            feedback_path: self.feedback_path,
            stage_name: self.stage_name,
            circuit_breaker: self.circuit_breaker,
            retry: self.retry,
            concurrency: self.concurrency,
            checkpoint: self.checkpoint,
            feedback: self.feedback,
            importance: self.importance,
            max_circuit_wait: self.max_circuit_wait,
            request_timeout: self.request_timeout,
            user_agent: self.user_agent,
            _phantom: PhantomData,
        }
    }
}

impl<State> PipelineConfigBuilder<State> {
    #[must_use]
    pub fn feedback_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.feedback_path = Some(path.into());
        self
    }

    #[must_use]
    pub fn stage_name(mut self, name: impl Into<String>) -> Self {
        self.stage_name = name.into();
        self
    }

    #[must_use]
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    #[must_use]
    pub fn concurrency(mut self, config: ConcurrencyConfig) -> Self {
        self.concurrency = config;
        self
    }

    #[must_use]
    pub fn checkpoint(mut self, config: CheckpointConfig) -> Self {
        self.checkpoint = config;
        self
    }

    #[must_use]
    pub fn feedback(mut self, config: FeedbackConfig) -> Self {
        self.feedback = config;
        self
    }

    #[must_use]
    pub fn importance(mut self, weights: ImportanceWeights) -> Self {
        self.importance = weights;
        self
    }

    #[must_use]
    pub fn max_circuit_wait(mut self, wait: Duration) -> Self {
        self.max_circuit_wait = wait;
        self
    }

    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

// Build method only available when the checkpoint directory is set
impl PipelineConfigBuilder<WithCheckpointDir> {
    /// Validate and build the configuration
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] reported by any sub-config.
    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        let checkpoint_dir = self
            .checkpoint_dir
            .ok_or_else(|| ConfigError::invalid("checkpoint_dir", "must be set"))?;
        let feedback_path = self
            .feedback_path
            .unwrap_or_else(|| checkpoint_dir.join(DEFAULT_FEEDBACK_FILE));

        let config = PipelineConfig {
            checkpoint_dir,
            feedback_path,
            stage_name: self.stage_name,
            circuit_breaker: self.circuit_breaker,
            retry: self.retry,
            concurrency: self.concurrency,
            checkpoint: self.checkpoint,
            feedback: self.feedback,
            importance: self.importance,
            max_circuit_wait: self.max_circuit_wait,
            request_timeout: self.request_timeout,
            user_agent: self.user_agent,
        };
        config.validate()?;
        Ok(config)
    }
}
