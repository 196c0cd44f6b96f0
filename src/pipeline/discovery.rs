//! Discovery side of the pipeline: candidate records and the admission gate
//!
//! The gate is where identity, dedup and feedback meet: a raw candidate is
//! canonicalized, dropped if already seen, suppressed if its pattern or
//! source has a poor track record, and otherwise admitted with a confidence
//! adjusted by history.

use log::{debug, warn};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::feedback::{FeedbackStore, pattern_of};
use crate::identity::{CanonicalUrl, DedupIndex, UrlError};

use super::PipelineError;

/// Source label for input lines that do not name one
pub const DEFAULT_SOURCE: &str = "input";

/// A raw URL proposed by some discovery technique
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub url: String,
    pub source: String,
    pub confidence: f64,
}

impl Candidate {
    #[must_use]
    pub fn new(url: impl Into<String>, source: impl Into<String>, confidence: f64) -> Self {
        Self {
            url: url.into(),
            source: source.into(),
            confidence,
        }
    }

    /// Parse `url[\tsource[\tconfidence]]`; blank lines and `#` comments yield
    /// `None`
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            return None;
        }
        let mut columns = line.split('\t');
        let url = columns.next().unwrap_or_default().trim().to_string();
        let source = columns
            .next()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SOURCE)
            .to_string();
        let confidence = columns
            .next()
            .and_then(|c| c.trim().parse::<f64>().ok())
            .filter(|c| c.is_finite())
            .map_or(1.0, |c| c.clamp(0.0, 1.0));
        Some(Self {
            url,
            source,
            confidence,
        })
    }
}

/// Read a candidate file; a record's index is its position among parsed lines
///
/// # Errors
///
/// Returns [`PipelineError::Io`] if the file cannot be read.
pub async fn load_candidates(path: &Path) -> Result<Vec<Candidate>, PipelineError> {
    let contents = tokio::fs::read_to_string(path).await?;
    Ok(contents.lines().filter_map(Candidate::from_line).collect())
}

/// An admitted candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Admitted {
    pub url: CanonicalUrl,
    pub source: String,
    /// Confidence after blending with the pattern's history
    pub confidence: f64,
}

/// Verdict of [`DiscoveryGate::admit`]
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Admitted(Admitted),
    Malformed(UrlError),
    Duplicate,
    LowQualityPattern { pattern: String },
    ThrottledSource { source: String },
}

/// Counts of gate decisions over a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GateSummary {
    pub admitted: u64,
    pub malformed: u64,
    pub duplicates: u64,
    pub suppressed_patterns: u64,
    pub throttled_sources: u64,
}

/// Filters discovery output before it becomes validation work
pub struct DiscoveryGate {
    dedup: Arc<DedupIndex>,
    feedback: Arc<FeedbackStore>,
}

impl DiscoveryGate {
    #[must_use]
    pub fn new(dedup: Arc<DedupIndex>, feedback: Arc<FeedbackStore>) -> Self {
        Self { dedup, feedback }
    }

    /// Decide on one candidate
    ///
    /// Suppression is checked before dedup so a suppressed URL is not marked
    /// seen; only admitted candidates are recorded via `record_discovery`.
    pub fn admit(&self, candidate: &Candidate) -> GateDecision {
        let url = match CanonicalUrl::parse(&candidate.url) {
            Ok(url) => url,
            Err(e) => {
                debug!("Dropping candidate: {e}");
                return GateDecision::Malformed(e);
            }
        };

        if self.feedback.should_throttle(&candidate.source) {
            return GateDecision::ThrottledSource {
                source: candidate.source.clone(),
            };
        }
        if self.feedback.is_low_quality(url.as_str()) {
            return GateDecision::LowQualityPattern {
                pattern: pattern_of(&url),
            };
        }
        if !self.dedup.check_and_mark(url.content_hash()) {
            return GateDecision::Duplicate;
        }

        self.feedback
            .record_discovery(url.as_str(), &candidate.source, candidate.confidence);
        let confidence =
            self.feedback
                .get_adjusted_confidence(url.as_str(), &candidate.source, candidate.confidence);
        GateDecision::Admitted(Admitted {
            url,
            source: candidate.source.clone(),
            confidence,
        })
    }

    /// Run a batch through [`Self::admit`], keeping admitted candidates in order
    pub fn admit_all(&self, candidates: &[Candidate]) -> (Vec<Admitted>, GateSummary) {
        let mut admitted = Vec::new();
        let mut summary = GateSummary::default();
        for candidate in candidates {
            match self.admit(candidate) {
                GateDecision::Admitted(a) => {
                    summary.admitted += 1;
                    admitted.push(a);
                }
                GateDecision::Malformed(_) => summary.malformed += 1,
                GateDecision::Duplicate => summary.duplicates += 1,
                GateDecision::LowQualityPattern { .. } => summary.suppressed_patterns += 1,
                GateDecision::ThrottledSource { .. } => summary.throttled_sources += 1,
            }
        }
        if summary.throttled_sources > 0 || summary.suppressed_patterns > 0 {
            warn!(
                "Discovery gate suppressed {} candidates from throttled sources and {} from low-quality patterns",
                summary.throttled_sources, summary.suppressed_patterns
            );
        }
        (admitted, summary)
    }
}
