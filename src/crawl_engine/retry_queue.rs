//! Retry queue for circuit-breaker-rejected items
//!
//! When a domain's circuit is OPEN, items are parked here instead of being
//! discarded. Once the breaker would admit a request again, items are drained
//! back to the stage for another attempt.

use dashmap::DashMap;
use log::info;
use std::sync::Arc;
use std::time::Duration;

use super::circuit_breaker::CircuitBreakerRegistry;
use super::crawl_types::WorkItem;

/// Holds items rejected by the circuit breaker for later retry
///
/// Items are keyed by domain so we can efficiently check which domains
/// have recovered.
pub struct RetryQueue {
    /// Domain -> pending items
    items: DashMap<String, Vec<WorkItem>>,
    breakers: Arc<CircuitBreakerRegistry>,
}

impl RetryQueue {
    #[must_use]
    pub fn new(breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            items: DashMap::new(),
            breakers,
        }
    }

    /// Park an item rejected due to an open circuit
    pub fn park(&self, item: WorkItem) {
        self.items.entry(item.domain.clone()).or_default().push(item);
    }

    /// Drain items whose domain would admit a request now
    ///
    /// Uses the non-mutating breaker check so the half-open trial slot is
    /// left for the attempt that follows.
    pub fn drain_ready(&self) -> Vec<WorkItem> {
        let ready_domains: Vec<String> = self
            .items
            .iter()
            .filter(|entry| self.breakers.time_until_allowed(entry.key()).is_zero())
            .map(|entry| entry.key().clone())
            .collect();

        let mut ready = Vec::new();
        for domain in ready_domains {
            if let Some((_, items)) = self.items.remove(&domain) {
                info!(
                    "Circuit breaker RECOVERY: re-queueing {} items for domain {}",
                    items.len(),
                    domain
                );
                ready.extend(items);
            }
        }
        ready.sort_by_key(|item| item.index);
        ready
    }

    /// Shortest wait until any parked domain admits a request
    #[must_use]
    pub fn next_ready_in(&self) -> Option<Duration> {
        self.items
            .iter()
            .map(|entry| self.breakers.time_until_allowed(entry.key()))
            .min()
    }

    /// Remove everything still parked, in input order
    pub fn drain_all(&self) -> Vec<WorkItem> {
        let domains: Vec<String> = self.items.iter().map(|e| e.key().clone()).collect();
        let mut rest: Vec<WorkItem> = domains
            .into_iter()
            .filter_map(|domain| self.items.remove(&domain))
            .flat_map(|(_, items)| items)
            .collect();
        rest.sort_by_key(|item| item.index);
        rest
    }

    /// Count of items waiting for retry across all domains
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.iter().map(|e| e.value().len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Count of items per domain, sorted by domain
    #[must_use]
    pub fn domain_counts(&self) -> Vec<(String, usize)> {
        let mut counts: Vec<_> = self
            .items
            .iter()
            .map(|e| (e.key().clone(), e.value().len()))
            .collect();
        counts.sort();
        counts
    }
}
