//! Core configuration types for the crawl pipeline
//!
//! Every component gets its own small config struct with defaults from
//! `utils::constants` and a `validate()` that rejects inconsistent values.
//! Durations are persisted as integer milliseconds (`*_ms` keys).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::constants::*;

/// Configuration validation failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Serde adapter storing a `Duration` as integer milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Per-domain circuit breaker thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Open the circuit after this many consecutive failures
    pub failure_threshold: u32,
    /// Close a half-open circuit after this many consecutive successes
    pub success_threshold: u32,
    /// How long an open circuit blocks before allowing a trial request
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            timeout: DEFAULT_BREAKER_TIMEOUT,
        }
    }
}

impl CircuitBreakerConfig {
    /// # Errors
    ///
    /// Rejects zero thresholds and `failure_threshold < success_threshold`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be at least 1"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold", "must be at least 1"));
        }
        if self.failure_threshold < self.success_threshold {
            return Err(ConfigError::invalid(
                "failure_threshold",
                format!(
                    "{} is below success_threshold {}",
                    self.failure_threshold, self.success_threshold
                ),
            ));
        }
        Ok(())
    }
}

/// Retry budgets and backoff shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retry budget for kinds without a dedicated budget (TLS, DNS, unknown)
    pub max_attempts: u32,
    pub transient_max_attempts: u32,
    pub rate_limit_max_attempts: u32,
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(rename = "rate_limit_base_delay_ms", with = "duration_ms")]
    pub rate_limit_base_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Relative jitter; 0.1 means ±10%
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            transient_max_attempts: DEFAULT_TRANSIENT_MAX_ATTEMPTS,
            rate_limit_max_attempts: DEFAULT_RATE_LIMIT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            rate_limit_base_delay: DEFAULT_RATE_LIMIT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            exponential_base: DEFAULT_EXPONENTIAL_BASE,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// # Errors
    ///
    /// Rejects `max_delay < base_delay` (or the rate-limit base delay),
    /// `exponential_base < 1` and jitter outside `[0, 1)`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_delay < self.base_delay {
            return Err(ConfigError::invalid(
                "max_delay",
                format!("{:?} is below base_delay {:?}", self.max_delay, self.base_delay),
            ));
        }
        if self.max_delay < self.rate_limit_base_delay {
            return Err(ConfigError::invalid(
                "max_delay",
                format!(
                    "{:?} is below rate_limit_base_delay {:?}",
                    self.max_delay, self.rate_limit_base_delay
                ),
            ));
        }
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(ConfigError::invalid("exponential_base", "must be >= 1.0"));
        }
        if !(0.0..1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::invalid("jitter_factor", "must be in [0, 1)"));
        }
        Ok(())
    }
}

/// AIMD concurrency controller parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub initial: usize,
    pub min: usize,
    pub max: usize,
    /// Additive increase step
    pub increment: usize,
    #[serde(rename = "increase_interval_ms", with = "duration_ms")]
    pub increase_interval: Duration,
    pub target_success_rate: f64,
    /// Rolling window length in outcomes
    pub window_size: usize,
    /// Outcomes required before any adjustment
    pub min_samples: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            initial: DEFAULT_INITIAL_CONCURRENCY,
            min: DEFAULT_MIN_CONCURRENCY,
            max: DEFAULT_MAX_CONCURRENCY,
            increment: DEFAULT_CONCURRENCY_INCREMENT,
            increase_interval: DEFAULT_INCREASE_INTERVAL,
            target_success_rate: DEFAULT_TARGET_SUCCESS_RATE,
            window_size: DEFAULT_CONCURRENCY_WINDOW,
            min_samples: DEFAULT_CONCURRENCY_MIN_SAMPLES,
        }
    }
}

impl ConcurrencyConfig {
    /// # Errors
    ///
    /// Rejects `min == 0`, `min > max`, `initial` outside `[min, max]`, a zero
    /// window or increment and a target rate outside `(0, 1]`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min == 0 {
            return Err(ConfigError::invalid("min", "must be at least 1"));
        }
        if self.min > self.max {
            return Err(ConfigError::invalid(
                "min",
                format!("{} exceeds max {}", self.min, self.max),
            ));
        }
        if !(self.min..=self.max).contains(&self.initial) {
            return Err(ConfigError::invalid(
                "initial",
                format!("{} is outside [{}, {}]", self.initial, self.min, self.max),
            ));
        }
        if self.increment == 0 {
            return Err(ConfigError::invalid("increment", "must be at least 1"));
        }
        if self.window_size == 0 {
            return Err(ConfigError::invalid("window_size", "must be at least 1"));
        }
        if self.min_samples > self.window_size {
            return Err(ConfigError::invalid(
                "min_samples",
                format!("{} exceeds window_size {}", self.min_samples, self.window_size),
            ));
        }
        if !(self.target_success_rate > 0.0 && self.target_success_rate <= 1.0) {
            return Err(ConfigError::invalid("target_success_rate", "must be in (0, 1]"));
        }
        Ok(())
    }
}

/// Checkpoint persistence cadence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Persist every N progress updates (resume-critical writes are immediate)
    pub save_interval: u64,
    /// Consecutive failed writes before the stage escalates to a fatal error
    pub max_write_failures: u32,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            save_interval: DEFAULT_CHECKPOINT_SAVE_INTERVAL,
            max_write_failures: DEFAULT_MAX_CHECKPOINT_WRITE_FAILURES,
        }
    }
}

impl CheckpointConfig {
    /// # Errors
    ///
    /// Rejects zero values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.save_interval == 0 {
            return Err(ConfigError::invalid("save_interval", "must be at least 1"));
        }
        if self.max_write_failures == 0 {
            return Err(ConfigError::invalid("max_write_failures", "must be at least 1"));
        }
        Ok(())
    }
}

/// Thresholds used by the feedback store's decision surfaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub low_quality_min_samples: u64,
    pub low_quality_max_success_rate: f64,
    pub throttle_min_samples: u64,
    pub throttle_max_success_rate: f64,
    pub confidence_min_samples: u64,
    pub session_history_limit: usize,
    /// Relative change between session halves reported as a trend
    pub trend_threshold: f64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            low_quality_min_samples: DEFAULT_LOW_QUALITY_MIN_SAMPLES,
            low_quality_max_success_rate: DEFAULT_LOW_QUALITY_MAX_SUCCESS_RATE,
            throttle_min_samples: DEFAULT_THROTTLE_MIN_SAMPLES,
            throttle_max_success_rate: DEFAULT_THROTTLE_MAX_SUCCESS_RATE,
            confidence_min_samples: DEFAULT_CONFIDENCE_MIN_SAMPLES,
            session_history_limit: DEFAULT_SESSION_HISTORY_LIMIT,
            trend_threshold: DEFAULT_TREND_THRESHOLD,
        }
    }
}

impl FeedbackConfig {
    /// # Errors
    ///
    /// Rejects rates outside `[0, 1]`, a zero history limit and a negative
    /// trend threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, rate) in [
            ("low_quality_max_success_rate", self.low_quality_max_success_rate),
            ("throttle_max_success_rate", self.throttle_max_success_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::invalid(field, "must be in [0, 1]"));
            }
        }
        if self.session_history_limit == 0 {
            return Err(ConfigError::invalid("session_history_limit", "must be at least 1"));
        }
        if !(self.trend_threshold >= 0.0) {
            return Err(ConfigError::invalid("trend_threshold", "must be >= 0"));
        }
        Ok(())
    }
}

/// Weights combining the external importance signals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportanceWeights {
    pub pagerank: f64,
    pub authority: f64,
    pub inlinks: f64,
}

impl Default for ImportanceWeights {
    fn default() -> Self {
        Self {
            pagerank: 0.4,
            authority: 0.4,
            inlinks: 0.2,
        }
    }
}

impl ImportanceWeights {
    /// # Errors
    ///
    /// Rejects negative weights and weights summing to zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let weights = [self.pagerank, self.authority, self.inlinks];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(ConfigError::invalid("importance", "weights must be non-negative"));
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            return Err(ConfigError::invalid("importance", "weights must not all be zero"));
        }
        Ok(())
    }
}

/// Main configuration struct for a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub(crate) checkpoint_dir: PathBuf,
    pub(crate) feedback_path: PathBuf,
    #[serde(default = "default_stage_name")]
    pub(crate) stage_name: String,
    #[serde(default)]
    pub(crate) circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub(crate) retry: RetryPolicy,
    #[serde(default)]
    pub(crate) concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub(crate) checkpoint: CheckpointConfig,
    #[serde(default)]
    pub(crate) feedback: FeedbackConfig,
    #[serde(default)]
    pub(crate) importance: ImportanceWeights,
    /// Longest the stage waits for open circuits after the main pass
    #[serde(rename = "max_circuit_wait_ms", with = "duration_ms", default = "default_circuit_wait")]
    pub(crate) max_circuit_wait: Duration,
    #[serde(rename = "request_timeout_ms", with = "duration_ms", default = "default_request_timeout")]
    pub(crate) request_timeout: Duration,
    #[serde(default = "default_user_agent")]
    pub(crate) user_agent: String,
}

fn default_stage_name() -> String {
    DEFAULT_VALIDATION_STAGE.to_string()
}

fn default_circuit_wait() -> Duration {
    DEFAULT_MAX_CIRCUIT_WAIT
}

fn default_request_timeout() -> Duration {
    DEFAULT_REQUEST_TIMEOUT
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl PipelineConfig {
    /// Validate every sub-config
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stage_name.trim().is_empty() {
            return Err(ConfigError::invalid("stage_name", "must not be empty"));
        }
        if self
            .stage_name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_')))
        {
            return Err(ConfigError::invalid(
                "stage_name",
                "only ASCII letters, digits, '-' and '_' are allowed",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::invalid("request_timeout", "must be non-zero"));
        }
        self.circuit_breaker.validate()?;
        self.retry.validate()?;
        self.concurrency.validate()?;
        self.checkpoint.validate()?;
        self.feedback.validate()?;
        self.importance.validate()?;
        Ok(())
    }

    /// Load and validate a JSON config file
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed, or does not validate.
    pub fn from_json_file(path: &std::path::Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        CircuitBreakerConfig::default().validate().unwrap();
        RetryPolicy::default().validate().unwrap();
        ConcurrencyConfig::default().validate().unwrap();
        CheckpointConfig::default().validate().unwrap();
        FeedbackConfig::default().validate().unwrap();
        ImportanceWeights::default().validate().unwrap();
    }

    #[test]
    fn test_breaker_rejects_inverted_thresholds() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            success_threshold: 2,
            ..CircuitBreakerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "failure_threshold", .. })
        ));
    }

    #[test]
    fn test_retry_rejects_max_below_base() {
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(5),
            rate_limit_base_delay: Duration::from_secs(1),
            ..RetryPolicy::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_concurrency_bounds() {
        let config = ConcurrencyConfig {
            initial: 100,
            ..ConcurrencyConfig::default()
        };
        assert!(config.validate().is_err());
        let config = ConcurrencyConfig {
            min: 0,
            ..ConcurrencyConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let json = serde_json::to_value(CircuitBreakerConfig::default()).unwrap();
        assert_eq!(json["timeout_ms"], 60_000);
        let parsed: RetryPolicy =
            serde_json::from_str(r#"{"base_delay_ms": 250, "max_delay_ms": 10000}"#).unwrap();
        assert_eq!(parsed.base_delay, Duration::from_millis(250));
        assert_eq!(parsed.transient_max_attempts, DEFAULT_TRANSIENT_MAX_ATTEMPTS);
    }
}
