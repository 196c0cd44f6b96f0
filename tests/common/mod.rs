//! Test utilities shared by the integration tests

use crawlkeeper::config::{
    CircuitBreakerConfig, ConcurrencyConfig, PipelineConfig, PipelineConfigBuilder, RetryPolicy,
    WithCheckpointDir,
};
use crawlkeeper::crawl_engine::FetchError;
use crawlkeeper::pipeline::{Candidate, FetchResponse, Fetcher};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What a scripted fetch does once its queue runs dry
#[derive(Clone)]
#[allow(dead_code)]
pub enum Fallback {
    Status(u16),
    Error(FetchError),
}

/// In-memory [`Fetcher`] replaying per-URL scripts
///
/// URLs without a script, or whose script is used up, get the fallback for
/// their host (200 by default).
#[derive(Default)]
pub struct ScriptedFetcher {
    scripts: Mutex<HashMap<String, VecDeque<Result<u16, FetchError>>>>,
    host_fallbacks: Mutex<HashMap<String, Fallback>>,
    calls: Mutex<Vec<String>>,
    delay: Option<Duration>,
    cancel_after: Option<(usize, CancellationToken)>,
}

#[allow(dead_code)]
impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch takes `delay` before answering
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    /// Cancel `token` once `calls` fetches have started
    pub fn cancel_after(mut self, calls: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((calls, token));
        self
    }

    pub fn push(&self, url: &str, result: Result<u16, FetchError>) {
        self.scripts
            .lock()
            .entry(url.to_string())
            .or_default()
            .push_back(result);
    }

    pub fn fallback_for_host(&self, host: &str, fallback: Fallback) {
        self.host_fallbacks.lock().insert(host.to_string(), fallback);
    }

    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|u| *u == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }

    /// URLs in the order they were fetched
    pub fn call_order(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

fn host_of(url: &str) -> &str {
    let rest = url.split_once("://").map_or(url, |(_, r)| r);
    rest.split(['/', '?', '#', ':']).next().unwrap_or(rest)
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
        let started = {
            let mut calls = self.calls.lock();
            calls.push(url.to_string());
            calls.len()
        };
        if let Some((limit, token)) = &self.cancel_after
            && started == *limit
        {
            token.cancel();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.scripts.lock().get_mut(url).and_then(VecDeque::pop_front);
        let result = scripted.unwrap_or_else(|| {
            match self.host_fallbacks.lock().get(host_of(url)).cloned() {
                Some(Fallback::Status(status)) => Ok(status),
                Some(Fallback::Error(error)) => Err(error),
                None => Ok(200),
            }
        });

        match result {
            Ok(status) if status >= 400 => Err(FetchError::from_status(status)),
            Ok(status) => Ok(FetchResponse {
                status,
                final_url: url.to_string(),
            }),
            Err(error) => Err(error),
        }
    }
}

/// Builder with millisecond backoffs so retries finish quickly
#[allow(dead_code)]
pub fn fast_builder(checkpoint_dir: &Path) -> PipelineConfigBuilder<WithCheckpointDir> {
    PipelineConfig::builder()
        .checkpoint_dir(checkpoint_dir)
        .feedback_path(checkpoint_dir.join("feedback.json"))
        .retry(RetryPolicy {
            base_delay: Duration::from_millis(1),
            rate_limit_base_delay: Duration::from_millis(2),
            max_delay: Duration::from_millis(10),
            ..RetryPolicy::default()
        })
        .concurrency(ConcurrencyConfig {
            initial: 4,
            min: 1,
            max: 8,
            ..ConcurrencyConfig::default()
        })
        .circuit_breaker(CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 1,
            timeout: Duration::from_secs(300),
        })
        .max_circuit_wait(Duration::from_millis(50))
}

#[allow(dead_code)]
pub fn fast_config(checkpoint_dir: &Path) -> PipelineConfig {
    fast_builder(checkpoint_dir)
        .build()
        .expect("test config is valid")
}

#[allow(dead_code)]
pub fn candidates(urls: &[&str], source: &str) -> Vec<Candidate> {
    urls.iter().map(|u| Candidate::new(*u, source, 0.9)).collect()
}
