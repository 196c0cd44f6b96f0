use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-stage outcome counters using lock-free atomic operations.
///
/// All counters use `Ordering::SeqCst` for sequential consistency,
/// ensuring snapshot reads are coherent across all fields.
#[derive(Debug, Clone)]
pub struct StageStats {
    pub succeeded: Arc<AtomicU64>,
    pub failed: Arc<AtomicU64>,
    /// Retry attempts, not items
    pub retried: Arc<AtomicU64>,
    pub circuit_blocked: Arc<AtomicU64>,
    pub skipped: Arc<AtomicU64>,
    /// Subset of `failed` rejected before any request
    pub malformed: Arc<AtomicU64>,
}

impl StageStats {
    #[must_use]
    pub fn new() -> Self {
        Self {
            succeeded: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
            retried: Arc::new(AtomicU64::new(0)),
            circuit_blocked: Arc::new(AtomicU64::new(0)),
            skipped: Arc::new(AtomicU64::new(0)),
            malformed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn increment_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_failed(&self) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn add_retried(&self, retries: u64) {
        self.retried.fetch_add(retries, Ordering::SeqCst);
    }

    pub fn increment_circuit_blocked(&self) {
        self.circuit_blocked.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_skipped(&self) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn snapshot(&self) -> StageStatsSnapshot {
        StageStatsSnapshot {
            succeeded: self.succeeded.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            retried: self.retried.load(Ordering::SeqCst),
            circuit_blocked: self.circuit_blocked.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            malformed: self.malformed.load(Ordering::SeqCst),
        }
    }
}

impl Default for StageStats {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageStatsSnapshot {
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
    pub circuit_blocked: u64,
    pub skipped: u64,
    pub malformed: u64,
}

impl StageStatsSnapshot {
    /// Items with a terminal outcome in this run
    #[must_use]
    pub fn total_items(&self) -> u64 {
        self.succeeded + self.failed + self.circuit_blocked + self.skipped
    }

    /// Successes over attempted items; circuit blocks and skips excluded
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let attempted = self.succeeded + self.failed;
        if attempted == 0 {
            return 1.0;
        }
        self.succeeded as f64 / attempted as f64
    }
}
