pub mod checkpoint;
pub mod config;
pub mod crawl_engine;
pub mod feedback;
pub mod identity;
pub mod pipeline;
pub mod utils;

pub use checkpoint::{
    CheckpointError, CheckpointManager, CheckpointState, CheckpointStatus, CheckpointStore,
    InputCheck, Progress, ProgressDelta, ResumePoint, StageSummary,
};
pub use config::{ConfigError, PipelineConfig};
pub use crawl_engine::{
    AdaptiveConcurrency, CircuitBreakerRegistry, CircuitState, ErrorKind, FetchError,
    ImportanceScore, ImportanceScorer, RetryQueue, WorkItem,
};
pub use feedback::{FeedbackStore, QualityReport, Trend};
pub use identity::{CanonicalUrl, DedupIndex, UrlError, canonicalize, extract_domain};
pub use pipeline::{
    Candidate, DiscoveryGate, FetchResponse, Fetcher, HttpFetcher, PipelineError, StageReport,
    ValidationStage,
};

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Run the validation stage over a candidate file
///
/// Wires the default components together: an [`HttpFetcher`], the stage's
/// checkpoint under `checkpoint_dir` and the feedback file at
/// `feedback_path`, which gets one session per call and is saved afterwards.
///
/// # Errors
///
/// Fails when the input cannot be read, the feedback file cannot be loaded
/// or saved, or checkpoint persistence fails beyond recovery.
pub async fn validate(
    config: &PipelineConfig,
    input: &Path,
    cancel: &CancellationToken,
) -> Result<StageReport, PipelineError> {
    config.validate()?;

    let candidates = pipeline::load_candidates(input).await?;
    let manager = CheckpointManager::new(config.checkpoint_dir(), config.checkpoint().clone());
    let checkpoint = Arc::new(manager.open_stage(config.stage_name()).await?);

    let check = checkpoint.validate_input(input).await;
    if !check.is_ok() {
        log::warn!("{}", check.reason());
    }
    let fingerprint = checkpoint::fingerprint_file(input).await.ok();

    let feedback =
        Arc::new(FeedbackStore::open(config.feedback_path(), config.feedback().clone()).await?);
    let session = feedback.start_session();
    log::info!(
        "Session {session}: validating {} candidates from {}",
        candidates.len(),
        input.display()
    );

    let fetcher = Arc::new(HttpFetcher::new(config.user_agent(), config.request_timeout())?);
    let stage = ValidationStage::new(config, fetcher, checkpoint, Arc::clone(&feedback));
    let result = stage.run(&candidates, fingerprint, cancel).await;

    // Outcomes recorded before a failure are still worth keeping
    feedback.end_session();
    feedback.save().await?;
    result
}
