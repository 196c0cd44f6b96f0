//! Stage control flow
//!
//! Discovery output passes the [`DiscoveryGate`]; the [`ValidationStage`]
//! fetches admitted URLs under circuit breakers, retry budgets and the AIMD
//! limit, feeding outcomes back into the feedback store and the checkpoint.

pub mod discovery;
pub mod fetcher;
pub mod stats;
pub mod validation;
pub mod watermark;

pub use discovery::{
    Admitted, Candidate, DEFAULT_SOURCE, DiscoveryGate, GateDecision, GateSummary,
    load_candidates,
};
pub use fetcher::{FetchResponse, Fetcher, HttpFetcher};
pub use stats::{StageStats, StageStatsSnapshot};
pub use validation::{StageReport, ValidationStage};
pub use watermark::Watermark;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;
use crate::feedback::FeedbackError;

/// Error types for stage execution
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Checkpoint persistence failed beyond recovery
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Feedback(#[from] FeedbackError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Reading stage input failed
    #[error("Input I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP client could not be constructed
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}
