//! Feedback / quality store
//!
//! Validation outcomes are aggregated per generalized URL pattern and per
//! discovery source, across sessions, and turned into decisions discovery
//! consumes: patterns to stop generating, sources to throttle and adjusted
//! confidence scores.

pub mod pattern;
pub mod store;
pub mod types;

pub use pattern::{MALFORMED_PATTERN, generalize, pattern_of};
pub use store::{FeedbackError, FeedbackStore};
pub use types::{
    FeedbackData, PatternStats, QualityReport, SessionStats, SessionTotals, SourcePerformance,
    SourceReport, SourceStats, Trend,
};
