//! Classified retry budgets and jittered exponential backoff
//!
//! `attempt` is the number of retries already performed for an item, so the
//! first retry waits roughly `base_delay` and an error kind with budget `n`
//! is retried exactly `n` times.

use log::debug;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::crawl_types::{ErrorKind, FetchError};
use crate::config::RetryPolicy;

/// Verdict of [`should_retry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub reason: String,
}

impl RetryDecision {
    /// `(retry, reason)` pair
    #[must_use]
    pub fn into_pair(self) -> (bool, String) {
        (self.retry, self.reason)
    }
}

/// Ephemeral per-item retry bookkeeping; never persisted
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Retries performed so far
    pub attempt_number: u32,
    pub error_kind: Option<ErrorKind>,
    first_attempt: Instant,
}

impl RetryContext {
    #[must_use]
    pub fn new() -> Self {
        Self {
            attempt_number: 0,
            error_kind: None,
            first_attempt: Instant::now(),
        }
    }

    /// Continue counting from `attempt_number` retries already performed
    #[must_use]
    pub fn resuming(attempt_number: u32, error_kind: Option<ErrorKind>) -> Self {
        Self {
            attempt_number,
            error_kind,
            first_attempt: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed_since_first_attempt(&self) -> Duration {
        self.first_attempt.elapsed()
    }

    /// Count a retry that is being issued now
    pub fn advance(&mut self, kind: ErrorKind) {
        self.error_kind = Some(kind);
        self.attempt_number += 1;
    }
}

impl Default for RetryContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryPolicy {
    /// Number of retries allowed for `kind`
    #[must_use]
    pub fn budget(&self, kind: ErrorKind) -> u32 {
        match kind {
            ErrorKind::MalformedUrl | ErrorKind::PermanentClient => 0,
            ErrorKind::TransientNetwork => self.transient_max_attempts,
            ErrorKind::RateLimited => self.rate_limit_max_attempts,
            ErrorKind::Tls | ErrorKind::Dns | ErrorKind::Unknown => self.max_attempts,
        }
    }

    #[must_use]
    pub fn base_delay_for(&self, kind: ErrorKind) -> Duration {
        if kind == ErrorKind::RateLimited {
            self.rate_limit_base_delay
        } else {
            self.base_delay
        }
    }

    /// `min(max_delay, base * exponential_base^attempt)` without jitter
    #[must_use]
    pub fn nominal_delay(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let base = self.base_delay_for(kind).as_secs_f64();
        let exp = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = base * self.exponential_base.powi(exp);
        let max = self.max_delay.as_secs_f64();
        if !raw.is_finite() || raw >= max {
            self.max_delay
        } else {
            Duration::from_secs_f64(raw)
        }
    }

    /// Nominal delay scaled by a uniform factor in `1 ± jitter_factor`
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32, kind: ErrorKind) -> Duration {
        let nominal = self.nominal_delay(attempt, kind);
        if self.jitter_factor <= 0.0 {
            return nominal;
        }
        let factor = 1.0 + rand::rng().random_range(-self.jitter_factor..=self.jitter_factor);
        nominal.mul_f64(factor)
    }

    /// Delay before retrying `error`; a `Retry-After` hint can only lengthen
    /// it, and never beyond `max_delay`
    #[must_use]
    pub fn delay_for(&self, attempt: u32, error: &FetchError) -> Duration {
        let delay = self.backoff_delay(attempt, error.kind);
        match error.retry_after {
            Some(hint) if hint > delay => hint.min(self.max_delay),
            _ => delay,
        }
    }
}

/// Sole retry gate: permanent kinds never retry, others until their budget is
/// used up
#[must_use]
pub fn should_retry(attempt: u32, kind: ErrorKind, policy: &RetryPolicy) -> RetryDecision {
    if !kind.is_retryable() {
        return RetryDecision {
            retry: false,
            reason: format!("{kind} errors are permanent"),
        };
    }
    let budget = policy.budget(kind);
    if attempt < budget {
        RetryDecision {
            retry: true,
            reason: format!("{kind} retry {}/{budget}", attempt + 1),
        }
    } else {
        RetryDecision {
            retry: false,
            reason: format!("{kind} retry budget of {budget} exhausted"),
        }
    }
}

/// Sleep for `delay` unless `cancel` fires first
///
/// Returns `false` when the wait was interrupted.
pub async fn wait_backoff(delay: Duration, cancel: &CancellationToken) -> bool {
    debug!("Backing off for {delay:?}");
    tokio::select! {
        () = tokio::time::sleep(delay) => true,
        () = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_per_kind() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.budget(ErrorKind::TransientNetwork), 5);
        assert_eq!(policy.budget(ErrorKind::RateLimited), 3);
        assert_eq!(policy.budget(ErrorKind::Dns), 3);
        assert_eq!(policy.budget(ErrorKind::PermanentClient), 0);
    }

    #[test]
    fn test_permanent_never_retries() {
        let policy = RetryPolicy::default();
        let decision = should_retry(0, ErrorKind::PermanentClient, &policy);
        assert!(!decision.retry);
        assert!(decision.reason.contains("permanent"));
        assert!(!should_retry(0, ErrorKind::MalformedUrl, &policy).retry);
    }

    #[test]
    fn test_transient_budget_exhaustion() {
        let policy = RetryPolicy::default();
        let retries = (0..)
            .take_while(|&a| should_retry(a, ErrorKind::TransientNetwork, &policy).retry)
            .count();
        assert_eq!(retries, 5);
    }

    #[test]
    fn test_delay_within_jitter_and_capped() {
        let policy = RetryPolicy::default();
        for attempt in 0..10 {
            let nominal = policy.nominal_delay(attempt, ErrorKind::TransientNetwork);
            let expected = (2f64.powi(attempt as i32)).min(60.0);
            assert!((nominal.as_secs_f64() - expected).abs() < 1e-9);

            let jittered = policy.backoff_delay(attempt, ErrorKind::TransientNetwork).as_secs_f64();
            assert!(jittered >= expected * 0.9 - 1e-9 && jittered <= expected * 1.1 + 1e-9);
        }
    }

    #[test]
    fn test_rate_limit_uses_larger_base() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.backoff_delay(0, ErrorKind::RateLimited), Duration::from_secs(5));
        assert_eq!(policy.backoff_delay(1, ErrorKind::RateLimited), Duration::from_secs(10));
    }

    #[test]
    fn test_retry_after_extends_delay() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::default()
        };
        let err = FetchError::from_status(429).with_retry_after(Duration::from_secs(30));
        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(30));

        let err = FetchError::from_status(429).with_retry_after(Duration::from_secs(600));
        assert_eq!(policy.delay_for(0, &err), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_backoff_cancellable() {
        let cancel = CancellationToken::new();
        assert!(wait_backoff(Duration::from_secs(1), &cancel).await);
        cancel.cancel();
        assert!(!wait_backoff(Duration::from_secs(3600), &cancel).await);
    }
}
