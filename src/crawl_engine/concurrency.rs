//! Adaptive (AIMD) concurrency limit
//!
//! Bounds in-flight work against a limit that halves whenever the rolling
//! success rate drops below target and grows by a fixed step at most once per
//! `increase_interval` while it stays at or above target. Unlike a
//! `Semaphore`, the limit can shrink below the current in-flight count; new
//! acquisitions then wait until enough permits are released.

use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::ConcurrencyConfig;

#[derive(Debug, Clone, Copy)]
struct Outcome {
    success: bool,
    duration_ms: u64,
}

struct ControllerState {
    limit: usize,
    in_flight: usize,
    window: VecDeque<Outcome>,
    last_increase: Instant,
}

impl ControllerState {
    fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let ok = self.window.iter().filter(|o| o.success).count();
        ok as f64 / self.window.len() as f64
    }

    fn mean_latency_ms(&self) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let total: u64 = self.window.iter().map(|o| o.duration_ms).sum();
        total as f64 / self.window.len() as f64
    }
}

/// Point-in-time view of the controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConcurrencySnapshot {
    pub limit: usize,
    pub in_flight: usize,
    pub success_rate: f64,
    pub mean_latency_ms: f64,
    pub samples: usize,
}

/// AIMD controller bounding concurrent units of work
pub struct AdaptiveConcurrency {
    config: ConcurrencyConfig,
    state: Mutex<ControllerState>,
    released: Notify,
}

impl AdaptiveConcurrency {
    #[must_use]
    pub fn new(config: ConcurrencyConfig) -> Self {
        let state = ControllerState {
            limit: config.initial,
            in_flight: 0,
            window: VecDeque::with_capacity(config.window_size),
            last_increase: Instant::now(),
        };
        Self {
            config,
            state: Mutex::new(state),
            released: Notify::new(),
        }
    }

    /// Wait for a free slot under the current limit
    ///
    /// The returned permit releases its slot on drop.
    pub async fn acquire(self: &Arc<Self>) -> ConcurrencyPermit {
        loop {
            // Register before checking so a release in between is not missed
            let released = self.released.notified();
            {
                let mut state = self.state.lock();
                if state.in_flight < state.limit {
                    state.in_flight += 1;
                    return ConcurrencyPermit {
                        controller: Arc::clone(self),
                    };
                }
            }
            released.await;
        }
    }

    fn release(&self) {
        {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.released.notify_waiters();
    }

    /// Append one completed unit to the rolling window
    pub fn record(&self, success: bool, duration_ms: u64) {
        let mut state = self.state.lock();
        if state.window.len() == self.config.window_size {
            state.window.pop_front();
        }
        state.window.push_back(Outcome {
            success,
            duration_ms,
        });
    }

    /// Apply one AIMD step and return the resulting limit
    ///
    /// Below target the limit halves immediately; at or above target it grows
    /// by `increment` once `increase_interval` has passed since the last
    /// increase. Nothing changes until `min_samples` outcomes are recorded.
    pub fn adjust(&self) -> usize {
        let raised = {
            let mut state = self.state.lock();
            if state.window.len() < self.config.min_samples {
                return state.limit;
            }
            let rate = state.success_rate();
            let old = state.limit;

            if rate < self.config.target_success_rate {
                let halved = (old / 2).max(self.config.min);
                if halved != old {
                    state.limit = halved;
                    info!(
                        "Concurrency decreased {old} -> {halved} (success rate {:.1}% < {:.1}%)",
                        rate * 100.0,
                        self.config.target_success_rate * 100.0
                    );
                }
                return state.limit;
            }

            let now = Instant::now();
            if now.duration_since(state.last_increase) < self.config.increase_interval {
                return state.limit;
            }
            state.last_increase = now;
            let raised = (old + self.config.increment).min(self.config.max);
            if raised == old {
                debug!("Concurrency at max {old}");
                return old;
            }
            state.limit = raised;
            info!(
                "Concurrency increased {old} -> {raised} (success rate {:.1}%)",
                rate * 100.0
            );
            raised
        };
        // More slots are open; wake waiters outside the lock
        self.released.notify_waiters();
        raised
    }

    #[must_use]
    pub fn limit(&self) -> usize {
        self.state.lock().limit
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    #[must_use]
    pub fn snapshot(&self) -> ConcurrencySnapshot {
        let state = self.state.lock();
        ConcurrencySnapshot {
            limit: state.limit,
            in_flight: state.in_flight,
            success_rate: state.success_rate(),
            mean_latency_ms: state.mean_latency_ms(),
            samples: state.window.len(),
        }
    }
}

/// A held concurrency slot
pub struct ConcurrencyPermit {
    controller: Arc<AdaptiveConcurrency>,
}

impl ConcurrencyPermit {
    /// Give the slot back explicitly
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        self.controller.release();
    }
}
