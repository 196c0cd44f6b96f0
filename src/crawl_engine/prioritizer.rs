//! Importance ordering of pending work
//!
//! Link-graph scores are computed elsewhere; this module only normalizes them
//! per batch and orders work by the weighted combination.

use std::collections::HashMap;

use crate::config::ImportanceWeights;

/// Raw importance signals of one URL
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ImportanceScore {
    pub pagerank: f64,
    pub authority: f64,
    pub inlink_count: u64,
}

/// Source of importance scores
pub trait ImportanceScorer: Send + Sync {
    /// Scores for `url`, or `None` when the URL is unknown to the graph
    fn importance(&self, url: &str) -> Option<ImportanceScore>;
}

impl ImportanceScorer for HashMap<String, ImportanceScore> {
    fn importance(&self, url: &str) -> Option<ImportanceScore> {
        self.get(url).copied()
    }
}

/// Order `items` by descending weighted importance
///
/// Each signal is divided by its maximum within the batch before weighting.
/// The sort is stable, and unscored items keep their relative order after all
/// scored ones.
pub fn prioritize<T>(
    items: Vec<T>,
    url_of: impl Fn(&T) -> &str,
    scorer: &dyn ImportanceScorer,
    weights: &ImportanceWeights,
) -> Vec<T> {
    let scores: Vec<Option<ImportanceScore>> =
        items.iter().map(|item| scorer.importance(url_of(item))).collect();

    let max_of = |f: fn(&ImportanceScore) -> f64| {
        scores
            .iter()
            .flatten()
            .map(f)
            .fold(0.0_f64, f64::max)
    };
    let max_pagerank = max_of(|s| s.pagerank);
    let max_authority = max_of(|s| s.authority);
    let max_inlinks = max_of(|s| s.inlink_count as f64);

    let normalize = |value: f64, max: f64| if max > 0.0 { value / max } else { 0.0 };

    let mut keyed: Vec<(Option<f64>, T)> = scores
        .into_iter()
        .map(|score| {
            score.map(|s| {
                weights.pagerank * normalize(s.pagerank, max_pagerank)
                    + weights.authority * normalize(s.authority, max_authority)
                    + weights.inlinks * normalize(s.inlink_count as f64, max_inlinks)
            })
        })
        .zip(items)
        .collect();

    keyed.sort_by(|(a, _), (b, _)| match (a, b) {
        (Some(a), Some(b)) => b.total_cmp(a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
    keyed.into_iter().map(|(_, item)| item).collect()
}
