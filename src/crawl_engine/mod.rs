//! Crawl Engine Module
//!
//! Failure isolation and flow control shared by every stage that makes
//! outbound requests: per-domain circuit breakers, classified retry with
//! backoff, the parked-item retry queue, AIMD concurrency and importance
//! ordering of pending work.

// Sub-modules
pub mod circuit_breaker;
pub mod concurrency;
pub mod crawl_types;
pub mod prioritizer;
pub mod retry_policy;
pub mod retry_queue;

// Re-export circuit breaker types
pub use circuit_breaker::{
    CircuitBreakerRegistry, CircuitDecision, CircuitState, DomainHealth, StateCounts,
};

// Re-export flow control
pub use concurrency::{AdaptiveConcurrency, ConcurrencyPermit, ConcurrencySnapshot};
pub use retry_policy::{RetryContext, RetryDecision, should_retry, wait_backoff};
pub use retry_queue::RetryQueue;

// Re-export crawl types
pub use crawl_types::{ErrorKind, FetchError, WorkItem};

pub use prioritizer::{ImportanceScore, ImportanceScorer, prioritize};
