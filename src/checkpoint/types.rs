//! Persisted checkpoint types
//!
//! Field names are the on-disk format; keep them stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Checkpoint file format version
pub const CHECKPOINT_VERSION: u32 = 1;

/// Lifecycle status of a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointStatus {
    /// Created, never started (or reset)
    Initialized,
    /// Actively processing
    Running,
    /// Stopped cooperatively; resumable
    Paused,
    /// Loaded after an unclean shutdown; resumable
    Recovering,
    /// All items processed
    Completed,
    /// Stopped by an error; resumable after inspection
    Failed,
}

impl CheckpointStatus {
    /// Stable persisted name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Recovering => "RECOVERING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a `start` from this status continues the previous run
    #[must_use]
    pub const fn is_resumable(self) -> bool {
        matches!(self, Self::Paused | Self::Recovering | Self::Failed)
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckpointStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INITIALIZED" => Ok(Self::Initialized),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "RECOVERING" => Ok(Self::Recovering),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown checkpoint status '{other}'")),
        }
    }
}

/// Cumulative progress counters of a stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub total: u64,
    /// Items with a terminal outcome (any of the buckets below)
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Retry attempts (not items)
    #[serde(default)]
    pub retried: u64,
    /// Items that ended blocked by an open circuit
    #[serde(default)]
    pub circuit_blocked: u64,
    pub start_time: Option<DateTime<Utc>>,
    pub last_update_time: Option<DateTime<Utc>>,
}

impl Progress {
    fn fresh(total: u64) -> Self {
        let now = Utc::now();
        Self {
            total,
            start_time: Some(now),
            last_update_time: Some(now),
            ..Self::default()
        }
    }

    /// Reset counters, keeping the item total
    pub(crate) fn cleared(&self) -> Self {
        Self {
            total: self.total,
            ..Self::default()
        }
    }

    pub(crate) fn restarted(total: u64) -> Self {
        Self::fresh(total)
    }

    pub(crate) fn apply(&mut self, delta: &ProgressDelta) {
        self.processed += delta.processed;
        self.successful += delta.successful;
        self.failed += delta.failed;
        self.skipped += delta.skipped;
        self.retried += delta.retried;
        self.circuit_blocked += delta.circuit_blocked;
        self.last_update_time = Some(Utc::now());
    }

    /// Items not yet processed
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.total.saturating_sub(self.processed)
    }

    /// Completion ratio in `[0, 1]`
    #[must_use]
    pub fn percent_complete(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.processed as f64 / self.total as f64).min(1.0)
    }

    /// Throughput since `start_time`
    #[must_use]
    pub fn items_per_second(&self) -> f64 {
        let Some(start) = self.start_time else {
            return 0.0;
        };
        let end = self.last_update_time.unwrap_or_else(Utc::now);
        let secs = (end - start).num_milliseconds() as f64 / 1000.0;
        if secs <= 0.0 {
            return 0.0;
        }
        self.processed as f64 / secs
    }

    /// Estimated time to finish at the current throughput
    #[must_use]
    pub fn eta(&self) -> Option<Duration> {
        let rate = self.items_per_second();
        if rate <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(self.remaining() as f64 / rate))
    }
}

/// Increment applied by `update_progress`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressDelta {
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    pub retried: u64,
    pub circuit_blocked: u64,
}

impl ProgressDelta {
    #[must_use]
    pub const fn success() -> Self {
        Self {
            processed: 1,
            successful: 1,
            failed: 0,
            skipped: 0,
            retried: 0,
            circuit_blocked: 0,
        }
    }

    #[must_use]
    pub const fn failure() -> Self {
        Self {
            processed: 1,
            successful: 0,
            failed: 1,
            skipped: 0,
            retried: 0,
            circuit_blocked: 0,
        }
    }

    #[must_use]
    pub const fn skipped() -> Self {
        Self {
            processed: 1,
            successful: 0,
            failed: 0,
            skipped: 1,
            retried: 0,
            circuit_blocked: 0,
        }
    }

    #[must_use]
    pub const fn circuit_blocked() -> Self {
        Self {
            processed: 1,
            successful: 0,
            failed: 0,
            skipped: 0,
            retried: 0,
            circuit_blocked: 1,
        }
    }

    /// Add retry attempts to this delta
    #[must_use]
    pub const fn with_retries(mut self, retried: u64) -> Self {
        self.retried = retried;
        self
    }
}

/// Full durable state of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub stage_name: String,
    pub status: CheckpointStatus,
    pub progress: Progress,
    /// Every index at or below this one is finished
    pub last_processed_index: Option<u64>,
    #[serde(default)]
    pub last_processed_item: Option<String>,
    pub input_file_fingerprint: Option<String>,
    pub error_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    CHECKPOINT_VERSION
}

impl CheckpointState {
    #[must_use]
    pub fn new(stage_name: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: CheckpointStatus::Initialized,
            progress: Progress::default(),
            last_processed_index: None,
            last_processed_item: None,
            input_file_fingerprint: None,
            error_count: 0,
            last_error: None,
            metadata: serde_json::Map::new(),
            version: CHECKPOINT_VERSION,
        }
    }

    /// O(1) resume test
    #[must_use]
    pub fn should_skip(&self, index: u64) -> bool {
        self.last_processed_index.is_some_and(|last| index <= last)
    }
}

/// Where a resumed run picks up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumePoint {
    /// First index that still needs processing
    pub next_index: u64,
    pub last_item: Option<String>,
    pub processed: u64,
}

/// Condensed view of a stage for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageSummary {
    pub stage_name: String,
    pub status: CheckpointStatus,
    pub total: u64,
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    pub retried: u64,
    pub circuit_blocked: u64,
    pub percent_complete: f64,
    pub last_processed_index: Option<u64>,
    pub error_count: u32,
    pub last_error: Option<String>,
}

impl From<&CheckpointState> for StageSummary {
    fn from(state: &CheckpointState) -> Self {
        let p = &state.progress;
        Self {
            stage_name: state.stage_name.clone(),
            status: state.status,
            total: p.total,
            processed: p.processed,
            successful: p.successful,
            failed: p.failed,
            skipped: p.skipped,
            retried: p.retried,
            circuit_blocked: p.circuit_blocked,
            percent_complete: p.percent_complete(),
            last_processed_index: state.last_processed_index,
            error_count: state.error_count,
            last_error: state.last_error.clone(),
        }
    }
}
