//! Circuit breaker pattern for domain-level failure isolation
//!
//! This module implements the circuit breaker pattern to detect consistently
//! failing domains and short-circuit further attempts, saving time and resources.
//!
//! The circuit breaker tracks domain health across three states:
//! - Closed: Normal operation, requests proceed
//! - Open: Too many failures, requests are blocked until the timeout elapses
//! - `HalfOpen`: One trial request at a time tests the domain
//!
//! Timing uses `tokio::time::Instant` so paused-clock tests can drive it.

use dashmap::DashMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - requests proceed
    Closed,
    /// Testing after cooldown - one trial request at a time
    HalfOpen,
    /// Failing - skip requests to save resources
    Open,
}

impl CircuitState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::HalfOpen => "HALF_OPEN",
            Self::Open => "OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health tracking for a single domain
#[derive(Debug, Clone)]
pub struct DomainHealth {
    pub state: CircuitState,
    /// Number of consecutive failures without success
    pub consecutive_failures: u32,
    /// Consecutive successes while in `HalfOpen` state
    pub consecutive_successes: u32,
    /// Time when circuit was opened (for timeout calculation)
    pub opened_at: Option<Instant>,
    pub total_attempts: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    /// Requests refused while the circuit was open
    pub total_blocked: u64,
    /// Set while a half-open trial request is outstanding
    trial_started: Option<Instant>,
}

impl DomainHealth {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            opened_at: None,
            total_attempts: 0,
            total_successes: 0,
            total_failures: 0,
            total_blocked: 0,
            trial_started: None,
        }
    }

    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.consecutive_successes = 0;
        self.trial_started = None;
    }
}

/// Outcome of [`CircuitBreakerRegistry::is_allowed`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircuitDecision {
    /// Circuit closed
    Allow,
    /// Half-open trial; the caller owns the single trial slot until it records
    /// an outcome
    Trial,
    /// Circuit open (or a trial is already outstanding)
    Deny { retry_after: Duration, reason: String },
}

impl CircuitDecision {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Deny { .. })
    }

    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Allow => "circuit closed".to_string(),
            Self::Trial => "half-open trial request".to_string(),
            Self::Deny { reason, .. } => reason.clone(),
        }
    }

    /// `(allowed, reason)` pair
    #[must_use]
    pub fn into_pair(self) -> (bool, String) {
        (self.is_allowed(), self.reason())
    }
}

/// Number of tracked domains per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub closed: usize,
    pub half_open: usize,
    pub open: usize,
}

/// Per-domain circuit breakers, created lazily on first use
pub struct CircuitBreakerRegistry {
    /// Health tracking for each domain
    domains: DashMap<String, DomainHealth>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            domains: DashMap::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Check whether a request to `domain` may be attempted now
    ///
    /// Must be called before every outbound attempt. An open circuit whose
    /// timeout has elapsed moves to `HalfOpen` and hands out the trial slot.
    pub fn is_allowed(&self, domain: &str) -> CircuitDecision {
        let now = Instant::now();
        let timeout = self.config.timeout;
        // entry() holds the shard lock: get-or-create and transition are atomic
        let mut health = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(DomainHealth::new);

        match health.state {
            CircuitState::Closed => CircuitDecision::Allow,
            CircuitState::Open => {
                let elapsed = health
                    .opened_at
                    .map_or(Duration::ZERO, |opened| now.duration_since(opened));
                if elapsed >= timeout {
                    health.state = CircuitState::HalfOpen;
                    health.consecutive_successes = 0;
                    health.trial_started = Some(now);
                    info!(
                        "Circuit breaker transitioning to HALF_OPEN for domain: {domain} (after {elapsed:?} timeout)"
                    );
                    CircuitDecision::Trial
                } else {
                    health.total_blocked += 1;
                    let retry_after = timeout - elapsed;
                    CircuitDecision::Deny {
                        retry_after,
                        reason: format!(
                            "circuit OPEN for {domain} after {} consecutive failures; retry in {:.1}s",
                            health.consecutive_failures,
                            retry_after.as_secs_f64()
                        ),
                    }
                }
            }
            CircuitState::HalfOpen => match health.trial_started {
                // A trial nobody reported back for a full timeout is abandoned
                Some(started) if now.duration_since(started) < timeout => {
                    health.total_blocked += 1;
                    CircuitDecision::Deny {
                        retry_after: timeout - now.duration_since(started),
                        reason: format!("circuit HALF_OPEN for {domain}; trial request in flight"),
                    }
                }
                _ => {
                    health.trial_started = Some(now);
                    CircuitDecision::Trial
                }
            },
        }
    }

    /// Non-mutating form of [`Self::is_allowed`]: how long until `domain`
    /// would admit a request (`Duration::ZERO` if it would right now)
    #[must_use]
    pub fn time_until_allowed(&self, domain: &str) -> Duration {
        let Some(health) = self.domains.get(domain) else {
            return Duration::ZERO;
        };
        let now = Instant::now();
        let timeout = self.config.timeout;
        match health.state {
            CircuitState::Closed => Duration::ZERO,
            CircuitState::Open => health.opened_at.map_or(Duration::ZERO, |opened| {
                timeout.saturating_sub(now.duration_since(opened))
            }),
            CircuitState::HalfOpen => health.trial_started.map_or(Duration::ZERO, |started| {
                timeout.saturating_sub(now.duration_since(started))
            }),
        }
    }

    /// Record a successful request to a domain
    ///
    /// This resets the consecutive failure count and may transition the circuit
    /// from `HalfOpen` to Closed state.
    pub fn record_success(&self, domain: &str) {
        let mut health = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(DomainHealth::new);

        health.consecutive_failures = 0;
        health.total_successes += 1;
        health.total_attempts += 1;

        if health.state == CircuitState::HalfOpen {
            health.consecutive_successes += 1;
            health.trial_started = None;

            if health.consecutive_successes >= self.config.success_threshold {
                health.state = CircuitState::Closed;
                health.opened_at = None;
                health.consecutive_successes = 0;
                info!("Circuit breaker CLOSED for domain: {domain}");
            } else {
                debug!(
                    "Circuit breaker HALF_OPEN success for domain: {} ({}/{})",
                    domain, health.consecutive_successes, self.config.success_threshold
                );
            }
        }
    }

    /// Record a failed request to a domain
    ///
    /// This increments the failure count and may open the circuit if the
    /// threshold is reached. Any failure while half-open reopens it and
    /// restarts the timeout clock.
    pub fn record_failure(&self, domain: &str, error: &str) {
        let now = Instant::now();
        let mut health = self
            .domains
            .entry(domain.to_string())
            .or_insert_with(DomainHealth::new);

        health.consecutive_failures += 1;
        health.total_failures += 1;
        health.total_attempts += 1;

        match health.state {
            CircuitState::HalfOpen => {
                health.open(now);
                warn!("Circuit breaker re-OPENED for domain {domain}: trial failed: {error}");
            }
            CircuitState::Closed if health.consecutive_failures >= self.config.failure_threshold => {
                health.open(now);
                warn!(
                    "Circuit breaker OPEN for domain {} after {} consecutive failures. Last error: {}",
                    domain, health.consecutive_failures, error
                );
            }
            CircuitState::Closed => {
                debug!(
                    "Circuit breaker failure for domain: {} ({}/{}): {}",
                    domain, health.consecutive_failures, self.config.failure_threshold, error
                );
            }
            // Late result of a request issued before the circuit opened
            CircuitState::Open => {}
        }
    }

    /// Get health statistics for a domain
    ///
    /// Returns None if the domain has not been seen yet.
    #[must_use]
    pub fn health(&self, domain: &str) -> Option<DomainHealth> {
        self.domains.get(domain).map(|r| r.value().clone())
    }

    #[must_use]
    pub fn state(&self, domain: &str) -> CircuitState {
        self.domains
            .get(domain)
            .map_or(CircuitState::Closed, |r| r.value().state)
    }

    /// Get list of domains currently in Open state, sorted
    #[must_use]
    pub fn open_domains(&self) -> Vec<String> {
        let mut open: Vec<String> = self
            .domains
            .iter()
            .filter(|entry| entry.value().state == CircuitState::Open)
            .map(|entry| entry.key().clone())
            .collect();
        open.sort();
        open
    }

    /// Get count of domains in each state
    #[must_use]
    pub fn state_counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for entry in &self.domains {
            match entry.value().state {
                CircuitState::Closed => counts.closed += 1,
                CircuitState::HalfOpen => counts.half_open += 1,
                CircuitState::Open => counts.open += 1,
            }
        }
        counts
    }

    /// Requests refused across all domains
    #[must_use]
    pub fn total_blocked(&self) -> u64 {
        self.domains.iter().map(|e| e.value().total_blocked).sum()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
