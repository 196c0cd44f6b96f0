//! Crash-safe, resumable per-stage progress
//!
//! Each stage owns one [`CheckpointStore`] backed by a JSON file in the
//! checkpoint directory; [`CheckpointManager`] opens and reports on them.

pub mod fingerprint;
pub mod manager;
pub mod store;
pub mod types;

pub use fingerprint::{InputCheck, check_input, fingerprint_file};
pub use manager::CheckpointManager;
pub use store::{CheckpointError, CheckpointStore};
pub use types::{
    CHECKPOINT_VERSION, CheckpointState, CheckpointStatus, Progress, ProgressDelta, ResumePoint,
    StageSummary,
};
