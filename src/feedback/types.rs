//! Feedback file records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crawl_engine::ErrorKind;

/// Aggregate outcome of every URL generalizing to one pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternStats {
    pub pattern: String,
    /// Source that most recently produced this pattern
    pub discovery_source: String,
    pub total_discovered: u64,
    pub total_validated: u64,
    pub total_failed: u64,
    pub success_rate: f64,
    pub avg_confidence: f64,
    #[serde(default)]
    pub failure_types: BTreeMap<String, u64>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl PatternStats {
    pub(crate) fn new(pattern: &str, source: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            discovery_source: source.to_string(),
            total_discovered: 0,
            total_validated: 0,
            total_failed: 0,
            success_rate: 0.0,
            avg_confidence: 0.0,
            failure_types: BTreeMap::new(),
            last_seen: None,
        }
    }

    /// Validation outcomes recorded so far
    #[must_use]
    pub fn samples(&self) -> u64 {
        self.total_validated + self.total_failed
    }
}

/// Aggregate outcome of one discovery technique
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub source: String,
    pub total_discovered: u64,
    pub total_validated: u64,
    pub total_failed: u64,
    pub success_rate: f64,
    pub avg_confidence: f64,
    #[serde(default)]
    pub failure_types: BTreeMap<String, u64>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl SourceStats {
    pub(crate) fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
            total_discovered: 0,
            total_validated: 0,
            total_failed: 0,
            success_rate: 0.0,
            avg_confidence: 0.0,
            failure_types: BTreeMap::new(),
            last_seen: None,
        }
    }

    #[must_use]
    pub fn samples(&self) -> u64 {
        self.total_validated + self.total_failed
    }
}

/// Counts shared by the aggregate records
pub(crate) trait OutcomeCounters {
    fn counters(&mut self) -> (&mut u64, &mut u64, &mut f64, &mut BTreeMap<String, u64>);
}

impl OutcomeCounters for PatternStats {
    fn counters(&mut self) -> (&mut u64, &mut u64, &mut f64, &mut BTreeMap<String, u64>) {
        (
            &mut self.total_validated,
            &mut self.total_failed,
            &mut self.success_rate,
            &mut self.failure_types,
        )
    }
}

impl OutcomeCounters for SourceStats {
    fn counters(&mut self) -> (&mut u64, &mut u64, &mut f64, &mut BTreeMap<String, u64>) {
        (
            &mut self.total_validated,
            &mut self.total_failed,
            &mut self.success_rate,
            &mut self.failure_types,
        )
    }
}

/// Apply one validation outcome and recompute `success_rate`
pub(crate) fn apply_outcome(stats: &mut impl OutcomeCounters, failure: Option<ErrorKind>) {
    let (validated, failed, rate, failure_types) = stats.counters();
    match failure {
        None => *validated += 1,
        Some(kind) => {
            *failed += 1;
            *failure_types.entry(kind.as_str().to_string()).or_default() += 1;
        }
    }
    let total = *validated + *failed;
    *rate = if total == 0 {
        0.0
    } else {
        *validated as f64 / total as f64
    };
}

/// Running average update for the `n`th sample
pub(crate) fn running_average(avg: f64, n: u64, sample: f64) -> f64 {
    if n == 0 {
        return sample;
    }
    avg + (sample - avg) / n as f64
}

/// Per-source slice of one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcePerformance {
    pub discovered: u64,
    pub validated: u64,
    pub failed: u64,
}

impl SourcePerformance {
    /// `None` until at least one validation outcome exists
    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.validated + self.failed;
        (total > 0).then(|| self.validated as f64 / total as f64)
    }
}

/// Totals of one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTotals {
    pub discovered: u64,
    pub validated: u64,
    pub failed: u64,
}

/// One pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub totals: SessionTotals,
    #[serde(default)]
    pub per_source_performance: BTreeMap<String, SourcePerformance>,
}

impl SessionStats {
    pub(crate) fn start() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            completed_at: None,
            totals: SessionTotals::default(),
            per_source_performance: BTreeMap::new(),
        }
    }
}

/// Everything persisted in the feedback file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackData {
    #[serde(default)]
    pub patterns: BTreeMap<String, PatternStats>,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceStats>,
    #[serde(default)]
    pub session_history: Vec<SessionStats>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Direction of a source's success rate across recent sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    /// Fewer than two sessions with outcomes for the source
    InsufficientData,
}

impl Trend {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Declining => "declining",
            Self::Stable => "stable",
            Self::InsufficientData => "insufficient_data",
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of [`QualityReport::sources`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    pub stats: SourceStats,
    pub trend: Trend,
    pub throttled: bool,
}

/// Summary for operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    /// Sources ranked by success rate, best first
    pub sources: Vec<SourceReport>,
    pub low_quality_patterns: Vec<String>,
    pub throttled_sources: Vec<String>,
    pub total_patterns: usize,
    pub sessions_recorded: usize,
    pub last_updated: Option<DateTime<Utc>>,
}
