//! Shared configuration constants for crawlkeeper
//!
//! This module contains default values and configuration constants used
//! throughout the codebase to ensure consistency and avoid magic numbers.

use std::time::Duration;

/// Consecutive failures before a domain's circuit opens
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Consecutive half-open successes needed to close a circuit
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;

/// How long an open circuit blocks a domain before a trial request
pub const DEFAULT_BREAKER_TIMEOUT: Duration = Duration::from_secs(60);

/// Overall attempt budget for retryable failures without a dedicated budget
/// (TLS, DNS, unknown)
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry budget for transient network failures
pub const DEFAULT_TRANSIENT_MAX_ATTEMPTS: u32 = 5;

/// Retry budget for rate-limited responses
pub const DEFAULT_RATE_LIMIT_MAX_ATTEMPTS: u32 = 3;

/// Base backoff delay
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Base backoff delay for rate-limited responses
///
/// Rate limits are a server telling us to go away; the first retry must
/// already be well spaced out.
pub const DEFAULT_RATE_LIMIT_BASE_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on any single backoff delay
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Exponential growth factor of the backoff delay
pub const DEFAULT_EXPONENTIAL_BASE: f64 = 2.0;

/// Relative jitter applied to every backoff delay (±10%)
pub const DEFAULT_JITTER_FACTOR: f64 = 0.1;

/// Initial number of concurrent units of work
pub const DEFAULT_INITIAL_CONCURRENCY: usize = 10;

/// Lower bound of the adaptive concurrency limit
pub const DEFAULT_MIN_CONCURRENCY: usize = 1;

/// Upper bound of the adaptive concurrency limit
pub const DEFAULT_MAX_CONCURRENCY: usize = 50;

/// Additive increase step of the AIMD loop
pub const DEFAULT_CONCURRENCY_INCREMENT: usize = 2;

/// Minimum time between two additive increases
pub const DEFAULT_INCREASE_INTERVAL: Duration = Duration::from_secs(5);

/// Success rate at or above which the limit may grow
pub const DEFAULT_TARGET_SUCCESS_RATE: f64 = 0.95;

/// Number of recent outcomes the AIMD loop looks at
pub const DEFAULT_CONCURRENCY_WINDOW: usize = 100;

/// Outcomes required in the window before the limit is adjusted at all
pub const DEFAULT_CONCURRENCY_MIN_SAMPLES: usize = 10;

/// Persist the checkpoint every N progress updates
pub const DEFAULT_CHECKPOINT_SAVE_INTERVAL: u64 = 10;

/// Consecutive failed checkpoint writes tolerated before the stage fails
pub const DEFAULT_MAX_CHECKPOINT_WRITE_FAILURES: u32 = 3;

/// Low-quality pattern detection: minimum validation samples
pub const DEFAULT_LOW_QUALITY_MIN_SAMPLES: u64 = 10;

/// Low-quality pattern detection: maximum success rate
pub const DEFAULT_LOW_QUALITY_MAX_SUCCESS_RATE: f64 = 0.3;

/// Source throttling: minimum validation samples
pub const DEFAULT_THROTTLE_MIN_SAMPLES: u64 = 50;

/// Source throttling: maximum success rate
pub const DEFAULT_THROTTLE_MAX_SUCCESS_RATE: f64 = 0.4;

/// Samples required before historical success rate adjusts a confidence
pub const DEFAULT_CONFIDENCE_MIN_SAMPLES: u64 = 5;

/// Number of pipeline sessions kept in the feedback file
pub const DEFAULT_SESSION_HISTORY_LIMIT: usize = 50;

/// Relative change between session halves that counts as a trend
pub const DEFAULT_TREND_THRESHOLD: f64 = 0.1;

/// Longest a stage waits for open circuits before giving up on parked items
pub const DEFAULT_MAX_CIRCUIT_WAIT: Duration = Duration::from_secs(120);

/// Per-request timeout used by the HTTP fetcher
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default stage name of the validation pass
pub const DEFAULT_VALIDATION_STAGE: &str = "validation";

/// User agent sent by the HTTP fetcher
pub const DEFAULT_USER_AGENT: &str = "crawlkeeper/0.3 (+https://kodegen.ai)";
