//! Validation stage: fetch every candidate under the resilience controls
//!
//! Per item: check the domain's circuit, fetch, report the outcome to the
//! breaker and the concurrency controller, and retry per the error kind's
//! budget. Terminal outcomes go to the feedback store and the checkpoint.
//! Items refused by an open circuit are parked and retried after the main
//! pass for at most `max_circuit_wait`. A parked item keeps its retry count
//! and the failure that scheduled its next retry. Whatever is still parked
//! at the deadline ends as a failure when it already failed once, and as
//! circuit-blocked when it was never fetched.
//!
//! Items complete out of order, so the checkpoint index only follows the
//! contiguous [`Watermark`]. Indices finished beyond a gap are kept in the
//! checkpoint metadata and skipped on resume.

use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::PipelineError;
use super::discovery::Candidate;
use super::fetcher::Fetcher;
use super::stats::{StageStats, StageStatsSnapshot};
use super::watermark::Watermark;
use crate::checkpoint::{CheckpointStatus, CheckpointStore, ProgressDelta, StageSummary};
use crate::config::{ImportanceWeights, PipelineConfig, RetryPolicy};
use crate::crawl_engine::{
    AdaptiveConcurrency, CircuitBreakerRegistry, CircuitDecision, ConcurrencyPermit,
    ConcurrencySnapshot, ErrorKind, FetchError, ImportanceScorer, RetryContext, RetryQueue,
    StateCounts, WorkItem, prioritize, should_retry, wait_backoff,
};
use crate::feedback::FeedbackStore;
use crate::identity::{CanonicalUrl, DedupIndex};

/// Checkpoint metadata key holding indices completed beyond the watermark
pub const COMPLETED_AHEAD_KEY: &str = "completed_ahead";

/// End-of-run report of one stage
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage_name: String,
    pub status: CheckpointStatus,
    /// Outcomes of this run only
    pub run: StageStatsSnapshot,
    /// Cumulative checkpoint view, including earlier runs
    pub checkpoint: StageSummary,
    pub open_domains: Vec<String>,
    pub breaker_states: StateCounts,
    pub circuit_refusals: u64,
    pub concurrency: ConcurrencySnapshot,
}

/// Result of [`ValidationStage::attempt`]; `item.retries` holds the retries issued
enum Attempt {
    Succeeded { item: WorkItem, status: u16 },
    Failed { item: WorkItem, error: FetchError },
    Blocked { item: WorkItem },
}

struct RunContext<'a> {
    inputs: &'a [Candidate],
    watermark: Mutex<Watermark>,
    parked: RetryQueue,
    /// Child of the caller's token; also cancelled on a fatal error
    cancel: CancellationToken,
}

/// The validation stage of a pipeline run
pub struct ValidationStage {
    fetcher: Arc<dyn Fetcher>,
    checkpoint: Arc<CheckpointStore>,
    feedback: Arc<FeedbackStore>,
    breakers: Arc<CircuitBreakerRegistry>,
    concurrency: Arc<AdaptiveConcurrency>,
    retry: RetryPolicy,
    importance: ImportanceWeights,
    scorer: Option<Arc<dyn ImportanceScorer>>,
    max_circuit_wait: Duration,
    stats: StageStats,
}

impl ValidationStage {
    #[must_use]
    pub fn new(
        config: &PipelineConfig,
        fetcher: Arc<dyn Fetcher>,
        checkpoint: Arc<CheckpointStore>,
        feedback: Arc<FeedbackStore>,
    ) -> Self {
        Self {
            fetcher,
            checkpoint,
            feedback,
            breakers: Arc::new(CircuitBreakerRegistry::new(config.circuit_breaker().clone())),
            concurrency: Arc::new(AdaptiveConcurrency::new(config.concurrency().clone())),
            retry: config.retry().clone(),
            importance: config.importance().clone(),
            scorer: None,
            max_circuit_wait: config.max_circuit_wait(),
            stats: StageStats::new(),
        }
    }

    /// Order each batch by external importance scores before processing
    #[must_use]
    pub fn with_scorer(mut self, scorer: Arc<dyn ImportanceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    #[must_use]
    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    #[must_use]
    pub fn concurrency(&self) -> &Arc<AdaptiveConcurrency> {
        &self.concurrency
    }

    #[must_use]
    pub fn stats(&self) -> &StageStats {
        &self.stats
    }

    /// Validate `inputs`, resuming from the checkpoint where possible
    ///
    /// The checkpoint ends `COMPLETED` when every item has an outcome,
    /// `PAUSED` when `cancel` stopped the run early and `FAILED` on a fatal
    /// checkpoint error, which is also returned.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Checkpoint`] when progress can no longer be
    /// persisted.
    pub async fn run(
        &self,
        inputs: &[Candidate],
        input_fingerprint: Option<String>,
        cancel: &CancellationToken,
    ) -> Result<StageReport, PipelineError> {
        let total = inputs.len() as u64;
        self.checkpoint.start(total, input_fingerprint).await?;

        let state = self.checkpoint.state();
        let resumed = state.progress.processed > 0;
        let next_index = self.checkpoint.get_resume_point().map_or(0, |p| p.next_index);
        let completed_ahead: HashSet<u64> = if resumed {
            state
                .metadata
                .get(COMPLETED_AHEAD_KEY)
                .and_then(|v| serde_json::from_value::<Vec<u64>>(v.clone()).ok())
                .unwrap_or_default()
                .into_iter()
                .collect()
        } else {
            self.checkpoint
                .set_metadata(COMPLETED_AHEAD_KEY, serde_json::json!([]));
            HashSet::new()
        };
        if resumed {
            info!(
                "Stage '{}' resuming at index {next_index}: {} of {total} already processed",
                state.stage_name, state.progress.processed
            );
        }

        let mut watermark = Watermark::starting_at(next_index);
        for &index in &completed_ahead {
            watermark.complete(index);
        }
        let run = RunContext {
            inputs,
            watermark: Mutex::new(watermark),
            parked: RetryQueue::new(Arc::clone(&self.breakers)),
            cancel: cancel.child_token(),
        };

        let outcome = self.execute(&run, &completed_ahead).await;

        let watermark = run.watermark.lock().await;
        self.checkpoint.set_metadata(
            COMPLETED_AHEAD_KEY,
            serde_json::json!(watermark.pending_indices()),
        );
        let finished = watermark.current().map_or(total == 0, |w| w + 1 >= total);
        drop(watermark);

        match outcome {
            Err(e) => {
                error!("Stage '{}' failed: {e}", state.stage_name);
                if let Err(fail_err) = self.checkpoint.fail(&e.to_string()).await {
                    warn!("Could not record failure in checkpoint: {fail_err}");
                }
                return Err(e);
            }
            Ok(()) if finished => self.checkpoint.complete().await?,
            Ok(()) => {
                info!(
                    "Stage '{}' paused with {} items outstanding",
                    state.stage_name,
                    self.checkpoint.progress().remaining()
                );
                self.checkpoint.pause().await?;
            }
        }

        Ok(self.report())
    }

    async fn execute(
        &self,
        run: &RunContext<'_>,
        completed_ahead: &HashSet<u64>,
    ) -> Result<(), PipelineError> {
        let dedup = DedupIndex::new();
        let mut work = Vec::new();

        for (position, candidate) in run.inputs.iter().enumerate() {
            let index = position as u64;
            let parsed = CanonicalUrl::parse(&candidate.url);
            let done = self.checkpoint.should_skip(index) || completed_ahead.contains(&index);

            let url = match parsed {
                Ok(url) => url,
                Err(_) if done => continue,
                Err(e) => {
                    debug!("Item {index} malformed: {e}");
                    self.stats.increment_malformed();
                    self.stats.increment_failed();
                    self.feedback.record_validation(
                        &candidate.url,
                        &candidate.source,
                        false,
                        None,
                        Some(ErrorKind::MalformedUrl),
                    );
                    self.settle(index, ProgressDelta::failure(), run).await?;
                    continue;
                }
            };

            // Seed dedup with finished items so resumed runs still catch repeats
            let first_sighting = dedup.check_and_mark(url.content_hash());
            if done {
                continue;
            }
            if !first_sighting {
                debug!("Item {index} duplicate of an earlier item: {url}");
                self.stats.increment_skipped();
                self.settle(index, ProgressDelta::skipped(), run).await?;
                continue;
            }

            work.push(WorkItem::new(
                index,
                url.as_str(),
                url.host(),
                candidate.source.as_str(),
                candidate.confidence,
            ));
        }

        if let Some(scorer) = &self.scorer {
            work = prioritize(work, |w| w.url.as_str(), scorer.as_ref(), &self.importance);
        }

        info!("Validating {} items", work.len());
        self.run_pass(work, run).await?;
        self.drain_parked(run).await
    }

    /// Process `items` concurrently under the adaptive limit
    ///
    /// Stops admitting new items on cancellation; in-flight items still reach
    /// a terminal outcome.
    async fn run_pass(
        &self,
        items: Vec<WorkItem>,
        run: &RunContext<'_>,
    ) -> Result<(), PipelineError> {
        let mut pending = items.into_iter();
        let mut next = pending.next();
        let mut in_flight = FuturesUnordered::new();
        let mut fatal: Option<PipelineError> = None;

        loop {
            let admitting = next.is_some() && fatal.is_none() && !run.cancel.is_cancelled();
            tokio::select! {
                biased;
                Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                    if let Err(e) = result
                        && fatal.is_none()
                    {
                        run.cancel.cancel();
                        fatal = Some(e);
                    }
                }
                permit = self.concurrency.acquire(), if admitting => {
                    // Cancellation may have fired while in-flight work was polled
                    if !run.cancel.is_cancelled()
                        && let Some(item) = next.take()
                    {
                        in_flight.push(self.process(item, permit, run));
                        next = pending.next();
                    }
                }
                () = run.cancel.cancelled(), if admitting => {}
                else => break,
            }
        }

        fatal.map_or(Ok(()), Err)
    }

    /// Retry parked items as their circuits allow, then report the rest
    async fn drain_parked(&self, run: &RunContext<'_>) -> Result<(), PipelineError> {
        if run.parked.is_empty() {
            return Ok(());
        }
        info!(
            "{} items parked behind open circuits; waiting up to {:?}",
            run.parked.len(),
            self.max_circuit_wait
        );

        let deadline = Instant::now() + self.max_circuit_wait;
        while !run.parked.is_empty() && !run.cancel.is_cancelled() && Instant::now() < deadline {
            let ready = run.parked.drain_ready();
            if !ready.is_empty() {
                self.run_pass(ready, run).await?;
                continue;
            }
            let Some(wait) = run.parked.next_ready_in() else {
                break;
            };
            if Instant::now() + wait > deadline {
                break;
            }
            if !wait_backoff(wait, &run.cancel).await {
                break;
            }
        }

        // Unstarted on cancellation: left for the resumed run
        if run.cancel.is_cancelled() {
            return Ok(());
        }
        for mut item in run.parked.drain_all() {
            if let Some(error) = item.last_error.take() {
                warn!(
                    "Item {} failed: {} refused its retry after {error}",
                    item.index, item.domain
                );
                self.settle_failure(&item, &error, run).await?;
                continue;
            }
            warn!(
                "Item {} circuit-blocked: {} still refusing requests",
                item.index, item.domain
            );
            self.stats.increment_circuit_blocked();
            self.settle(item.index, ProgressDelta::circuit_blocked(), run).await?;
        }
        Ok(())
    }

    async fn process(
        &self,
        item: WorkItem,
        permit: ConcurrencyPermit,
        run: &RunContext<'_>,
    ) -> Result<(), PipelineError> {
        match self.attempt(item, permit, &run.cancel).await {
            Attempt::Succeeded { item, status } => {
                self.stats.increment_succeeded();
                self.feedback
                    .record_validation(&item.url, &item.source, true, Some(status), None);
                let delta = ProgressDelta::success().with_retries(item.retries.into());
                self.settle(item.index, delta, run).await
            }
            Attempt::Failed { item, error } => self.settle_failure(&item, &error, run).await,
            Attempt::Blocked { item } => {
                run.parked.park(item);
                Ok(())
            }
        }
    }

    async fn settle_failure(
        &self,
        item: &WorkItem,
        error: &FetchError,
        run: &RunContext<'_>,
    ) -> Result<(), PipelineError> {
        debug!("Item {} failed after {} retries: {error}", item.index, item.retries);
        self.stats.increment_failed();
        self.feedback.record_validation(
            &item.url,
            &item.source,
            false,
            error.status,
            Some(error.kind),
        );
        let delta = ProgressDelta::failure().with_retries(item.retries.into());
        self.settle(item.index, delta, run).await
    }

    /// Fetch with circuit checks and classified retry
    ///
    /// The concurrency slot is given up while backing off. A retry is only
    /// counted once its fetch is issued; one refused by the circuit stays
    /// pending on the parked item.
    async fn attempt(
        &self,
        mut item: WorkItem,
        permit: ConcurrencyPermit,
        cancel: &CancellationToken,
    ) -> Attempt {
        let mut permit = permit;
        let mut pending = item.last_error.take();
        let mut ctx = RetryContext::resuming(item.retries, pending.as_ref().map(|e| e.kind));

        loop {
            if let CircuitDecision::Deny { reason, .. } = self.breakers.is_allowed(&item.domain) {
                debug!("Item {} parked: {reason}", item.index);
                item.last_error = pending;
                return Attempt::Blocked { item };
            }
            if let Some(previous) = pending.take() {
                ctx.advance(previous.kind);
                self.stats.add_retried(1);
            }
            item.retries = ctx.attempt_number;

            let started = Instant::now();
            let result = self.fetcher.fetch(&item.url).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            let error = match result {
                Ok(response) => {
                    self.breakers.record_success(&item.domain);
                    self.concurrency.record(true, elapsed_ms);
                    self.concurrency.adjust();
                    return Attempt::Succeeded {
                        item,
                        status: response.status,
                    };
                }
                Err(error) => error,
            };

            self.breakers.record_failure(&item.domain, &error.to_string());
            self.concurrency.record(false, elapsed_ms);
            self.concurrency.adjust();

            let decision = should_retry(ctx.attempt_number, error.kind, &self.retry);
            if !decision.retry {
                debug!("{}: {}", item.url, decision.reason);
                return Attempt::Failed { item, error };
            }

            let delay = self.retry.delay_for(ctx.attempt_number, &error);
            debug!(
                "{}: {error}; {} after {delay:?} ({:?} since first attempt)",
                item.url,
                decision.reason,
                ctx.elapsed_since_first_attempt()
            );
            drop(permit);

            if !wait_backoff(delay, cancel).await {
                return Attempt::Failed { item, error };
            }
            permit = tokio::select! {
                permit = self.concurrency.acquire() => permit,
                () = cancel.cancelled() => return Attempt::Failed { item, error },
            };
            pending = Some(error);
        }
    }

    /// Record a terminal outcome for `index` and move the watermark
    async fn settle(
        &self,
        index: u64,
        delta: ProgressDelta,
        run: &RunContext<'_>,
    ) -> Result<(), PipelineError> {
        // Held across the write so checkpoint indices are applied in order
        let mut watermark = run.watermark.lock().await;
        let had_pending = watermark.pending() > 0;
        let advanced = watermark.complete(index);
        if had_pending || watermark.pending() > 0 {
            self.checkpoint.set_metadata(
                COMPLETED_AHEAD_KEY,
                serde_json::json!(watermark.pending_indices()),
            );
        }
        let last_item = advanced
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| run.inputs.get(i))
            .map(|c| c.url.as_str());
        self.checkpoint
            .update_progress(delta, last_item, advanced)
            .await?;
        Ok(())
    }

    #[must_use]
    pub fn report(&self) -> StageReport {
        let checkpoint = self.checkpoint.summary();
        StageReport {
            stage_name: checkpoint.stage_name.clone(),
            status: checkpoint.status,
            run: self.stats.snapshot(),
            checkpoint,
            open_domains: self.breakers.open_domains(),
            breaker_states: self.breakers.state_counts(),
            circuit_refusals: self.breakers.total_blocked(),
            concurrency: self.concurrency.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, ConcurrencyConfig};
    use crate::pipeline::FetchResponse;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::{HashMap, VecDeque};

    /// Plays back queued results per URL, then answers 200
    #[derive(Default)]
    struct ScriptedFetcher {
        script: SyncMutex<HashMap<String, VecDeque<Result<u16, FetchError>>>>,
        calls: SyncMutex<HashMap<String, u32>>,
    }

    impl ScriptedFetcher {
        fn push(&self, url: &str, result: Result<u16, FetchError>) {
            self.script
                .lock()
                .entry(url.to_string())
                .or_default()
                .push_back(result);
        }

        fn calls(&self, url: &str) -> u32 {
            self.calls.lock().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchResponse, FetchError> {
            *self.calls.lock().entry(url.to_string()).or_default() += 1;
            let next = self.script.lock().get_mut(url).and_then(VecDeque::pop_front);
            next.unwrap_or(Ok(200)).map(|status| FetchResponse {
                status,
                final_url: url.to_string(),
            })
        }
    }

    fn config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig::builder()
            .checkpoint_dir(dir)
            .retry(RetryPolicy {
                base_delay: Duration::from_millis(1),
                rate_limit_base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                ..RetryPolicy::default()
            })
            .concurrency(ConcurrencyConfig {
                initial: 1,
                ..ConcurrencyConfig::default()
            })
            .circuit_breaker(CircuitBreakerConfig {
                failure_threshold: 2,
                success_threshold: 1,
                timeout: Duration::from_secs(600),
            })
            .max_circuit_wait(Duration::from_millis(20))
            .build()
            .unwrap()
    }

    async fn stage(
        dir: &std::path::Path,
        fetcher: Arc<ScriptedFetcher>,
    ) -> (ValidationStage, Arc<CheckpointStore>, Arc<FeedbackStore>) {
        let config = config(dir);
        let checkpoint = Arc::new(
            CheckpointStore::open(dir, "validation", config.checkpoint().clone())
                .await
                .unwrap(),
        );
        let feedback = Arc::new(FeedbackStore::in_memory(config.feedback().clone()));
        let stage = ValidationStage::new(
            &config,
            fetcher,
            Arc::clone(&checkpoint),
            Arc::clone(&feedback),
        );
        (stage, checkpoint, feedback)
    }

    fn inputs(urls: &[&str]) -> Vec<Candidate> {
        urls.iter().map(|u| Candidate::new(*u, "links", 0.8)).collect()
    }

    #[tokio::test]
    async fn test_outcomes_reach_checkpoint_and_feedback() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        fetcher.push("https://a.edu/flaky", Err(FetchError::from_status(503)));
        // Separate domain so two failures cannot trip the threshold-2 breaker
        fetcher.push("https://b.edu/gone", Err(FetchError::from_status(404)));
        let (stage, checkpoint, feedback) = stage(dir.path(), Arc::clone(&fetcher)).await;

        let batch = inputs(&[
            "https://a.edu/ok",
            "https://a.edu/flaky",
            "https://b.edu/gone",
            "https://A.edu/ok",
            "::not a url::",
        ]);
        let report = stage
            .run(&batch, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, CheckpointStatus::Completed);
        assert_eq!(report.run.succeeded, 2);
        assert_eq!(report.run.failed, 2);
        assert_eq!(report.run.malformed, 1);
        assert_eq!(report.run.skipped, 1);
        assert_eq!(report.run.retried, 1);

        let progress = checkpoint.progress();
        assert_eq!(progress.processed, 5);
        assert_eq!(progress.retried, 1);
        assert_eq!(checkpoint.state().last_processed_index, Some(4));

        // Permanent client errors are never retried
        assert_eq!(fetcher.calls("https://b.edu/gone"), 1);
        assert_eq!(fetcher.calls("https://a.edu/flaky"), 2);
        assert_eq!(fetcher.calls("https://a.edu/ok"), 1);

        let stats = feedback.source_stats("links").unwrap();
        assert_eq!(stats.total_validated, 2);
        assert_eq!(stats.total_failed, 2);
    }

    #[tokio::test]
    async fn test_open_circuit_items_end_circuit_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        for i in 0..2 {
            fetcher.push(&format!("https://down.edu/{i}"), Err(FetchError::from_status(404)));
        }
        let (stage, checkpoint, _) = stage(dir.path(), Arc::clone(&fetcher)).await;

        let batch = inputs(&[
            "https://down.edu/0",
            "https://down.edu/1",
            "https://down.edu/2",
            "https://down.edu/3",
        ]);
        let report = stage
            .run(&batch, None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.status, CheckpointStatus::Completed);
        assert_eq!(report.run.circuit_blocked, 2);
        assert_eq!(report.open_domains, vec!["down.edu".to_string()]);
        assert!(report.circuit_refusals >= 2);
        assert_eq!(fetcher.calls("https://down.edu/2"), 0);
        assert_eq!(checkpoint.progress().circuit_blocked, 2);
        assert_eq!(checkpoint.progress().processed, 4);
    }

    #[tokio::test]
    async fn test_resume_skips_processed_indices() {
        let dir = tempfile::tempdir().unwrap();
        let batch = inputs(&["https://a.edu/0", "https://a.edu/1", "https://a.edu/2"]);
        {
            let checkpoint =
                CheckpointStore::open(dir.path(), "validation", Default::default())
                    .await
                    .unwrap();
            checkpoint.start(3, None).await.unwrap();
            checkpoint
                .update_progress(ProgressDelta::success(), Some("https://a.edu/0"), Some(0))
                .await
                .unwrap();
            checkpoint
                .update_progress(ProgressDelta::success(), Some("https://a.edu/1"), Some(1))
                .await
                .unwrap();
            // Dropped while RUNNING
        }

        let fetcher = Arc::new(ScriptedFetcher::default());
        let (stage, checkpoint, _) = stage(dir.path(), Arc::clone(&fetcher)).await;
        assert_eq!(checkpoint.status(), CheckpointStatus::Recovering);

        let report = stage
            .run(&batch, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.status, CheckpointStatus::Completed);
        assert_eq!(fetcher.calls("https://a.edu/0"), 0);
        assert_eq!(fetcher.calls("https://a.edu/1"), 0);
        assert_eq!(fetcher.calls("https://a.edu/2"), 1);
        assert_eq!(checkpoint.progress().processed, 3);
        assert_eq!(report.run.succeeded, 1);
    }

    #[tokio::test]
    async fn test_cancelled_run_pauses() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        let (stage, checkpoint, _) = stage(dir.path(), Arc::clone(&fetcher)).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = stage
            .run(&inputs(&["https://a.edu/0", "https://a.edu/1"]), None, &cancel)
            .await
            .unwrap();

        assert_eq!(report.status, CheckpointStatus::Paused);
        assert_eq!(fetcher.calls("https://a.edu/0"), 0);
        assert_eq!(checkpoint.progress().processed, 0);
        assert!(checkpoint.get_resume_point().is_none());
    }
}
