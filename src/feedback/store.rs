//! Feedback store: validation outcomes aggregated per pattern and source
//!
//! One instance is constructed per pipeline run and shared by the discovery
//! gate and the validation stage. Mutations go through a single write lock so
//! pattern, source and session counters always move together.

use chrono::Utc;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::path::{Path, PathBuf};

use super::pattern::generalize;
use super::types::{
    FeedbackData, PatternStats, QualityReport, SessionStats, SourceReport, SourceStats, Trend,
    apply_outcome, running_average,
};
use crate::config::FeedbackConfig;
use crate::crawl_engine::ErrorKind;
use crate::utils::{BackupPolicy, LoadSource, read_json_with_backup, write_json_atomic_with};

/// Error types for feedback persistence
#[derive(Debug, thiserror::Error)]
pub enum FeedbackError {
    #[error("Failed to load feedback file {path}: {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to save feedback file {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

struct Inner {
    data: FeedbackData,
    session: Option<SessionStats>,
    backup: BackupPolicy,
}

/// Quality signals fed back from validation into discovery
pub struct FeedbackStore {
    path: Option<PathBuf>,
    config: FeedbackConfig,
    inner: RwLock<Inner>,
}

impl FeedbackStore {
    /// Store that never touches disk
    #[must_use]
    pub fn in_memory(config: FeedbackConfig) -> Self {
        Self {
            path: None,
            config,
            inner: RwLock::new(Inner {
                data: FeedbackData::default(),
                session: None,
                backup: BackupPolicy::Rotate,
            }),
        }
    }

    /// Load the feedback file at `path`, or start empty if there is none
    ///
    /// # Errors
    ///
    /// Returns [`FeedbackError::Load`] when the file and its backup both exist
    /// but neither can be read.
    pub async fn open(path: &Path, config: FeedbackConfig) -> Result<Self, FeedbackError> {
        let (data, backup) = match read_json_with_backup::<FeedbackData>(path).await {
            Ok(Some((data, source))) => {
                if source == LoadSource::Backup {
                    warn!("Feedback file {} was unreadable; loaded backup", path.display());
                }
                debug!(
                    "Loaded feedback: {} patterns, {} sources, {} sessions",
                    data.patterns.len(),
                    data.sources.len(),
                    data.session_history.len()
                );
                (data, BackupPolicy::after_load(source))
            }
            Ok(None) => (FeedbackData::default(), BackupPolicy::Rotate),
            Err(source) => {
                return Err(FeedbackError::Load {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            config,
            inner: RwLock::new(Inner {
                data,
                session: None,
                backup,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &FeedbackConfig {
        &self.config
    }

    /// Begin a new session, closing any session still open
    pub fn start_session(&self) -> String {
        let mut inner = self.inner.write();
        if inner.session.is_some() {
            warn!("Starting a feedback session while one is open; closing the old one");
            self.close_session(&mut inner);
        }
        let session = SessionStats::start();
        let id = session.session_id.clone();
        info!("Feedback session {id} started");
        inner.session = Some(session);
        id
    }

    /// Close the current session and append it to the bounded history
    pub fn end_session(&self) -> Option<SessionStats> {
        let mut inner = self.inner.write();
        self.close_session(&mut inner)
    }

    fn close_session(&self, inner: &mut Inner) -> Option<SessionStats> {
        let mut session = inner.session.take()?;
        session.completed_at = Some(Utc::now());
        inner.data.session_history.push(session.clone());

        let history = &mut inner.data.session_history;
        let limit = self.config.session_history_limit;
        if history.len() > limit {
            let excess = history.len() - limit;
            history.drain(..excess);
        }
        info!(
            "Feedback session {} ended: {} discovered, {} validated, {} failed",
            session.session_id,
            session.totals.discovered,
            session.totals.validated,
            session.totals.failed
        );
        Some(session)
    }

    #[must_use]
    pub fn current_session(&self) -> Option<SessionStats> {
        self.inner.read().session.clone()
    }

    /// Count a discovered candidate and fold its confidence into the averages
    pub fn record_discovery(&self, url: &str, source: &str, confidence: f64) {
        let pattern = generalize(url);
        let now = Utc::now();
        let mut inner = self.inner.write();

        let stats = inner
            .data
            .patterns
            .entry(pattern.clone())
            .or_insert_with(|| PatternStats::new(&pattern, source));
        stats.total_discovered += 1;
        stats.avg_confidence =
            running_average(stats.avg_confidence, stats.total_discovered, confidence);
        stats.discovery_source = source.to_string();
        stats.last_seen = Some(now);

        let stats = inner
            .data
            .sources
            .entry(source.to_string())
            .or_insert_with(|| SourceStats::new(source));
        stats.total_discovered += 1;
        stats.avg_confidence =
            running_average(stats.avg_confidence, stats.total_discovered, confidence);
        stats.last_seen = Some(now);

        if let Some(session) = inner.session.as_mut() {
            session.totals.discovered += 1;
            session
                .per_source_performance
                .entry(source.to_string())
                .or_default()
                .discovered += 1;
        }
    }

    /// Record the terminal validation outcome of `url`
    ///
    /// Without an explicit `error_kind`, a failing `status_code` is classified;
    /// anything else counts as `unknown`.
    pub fn record_validation(
        &self,
        url: &str,
        source: &str,
        is_valid: bool,
        status_code: Option<u16>,
        error_kind: Option<ErrorKind>,
    ) {
        let failure = (!is_valid).then(|| {
            error_kind
                .or_else(|| status_code.and_then(ErrorKind::classify_status))
                .unwrap_or(ErrorKind::Unknown)
        });
        let pattern = generalize(url);
        let now = Utc::now();
        let mut inner = self.inner.write();

        let stats = inner
            .data
            .patterns
            .entry(pattern.clone())
            .or_insert_with(|| PatternStats::new(&pattern, source));
        apply_outcome(stats, failure);
        stats.last_seen = Some(now);

        let stats = inner
            .data
            .sources
            .entry(source.to_string())
            .or_insert_with(|| SourceStats::new(source));
        apply_outcome(stats, failure);
        stats.last_seen = Some(now);

        if let Some(session) = inner.session.as_mut() {
            let perf = session
                .per_source_performance
                .entry(source.to_string())
                .or_default();
            if failure.is_none() {
                session.totals.validated += 1;
                perf.validated += 1;
            } else {
                session.totals.failed += 1;
                perf.failed += 1;
            }
        }
    }

    /// Patterns with at least `min_samples` outcomes and a success rate at or
    /// below `max_success_rate`, sorted
    #[must_use]
    pub fn get_low_quality_patterns(&self, min_samples: u64, max_success_rate: f64) -> Vec<String> {
        self.inner
            .read()
            .data
            .patterns
            .values()
            .filter(|p| p.samples() >= min_samples && p.success_rate <= max_success_rate)
            .map(|p| p.pattern.clone())
            .collect()
    }

    /// [`Self::get_low_quality_patterns`] with the configured thresholds
    #[must_use]
    pub fn low_quality_patterns(&self) -> Vec<String> {
        self.get_low_quality_patterns(
            self.config.low_quality_min_samples,
            self.config.low_quality_max_success_rate,
        )
    }

    /// Whether `url` belongs to a low-quality pattern under the configured
    /// thresholds
    #[must_use]
    pub fn is_low_quality(&self, url: &str) -> bool {
        let pattern = generalize(url);
        self.inner.read().data.patterns.get(&pattern).is_some_and(|p| {
            p.samples() >= self.config.low_quality_min_samples
                && p.success_rate <= self.config.low_quality_max_success_rate
        })
    }

    /// Whether `source` has enough outcomes and a poor enough success rate to
    /// be suppressed
    #[must_use]
    pub fn should_throttle_source(
        &self,
        source: &str,
        min_samples: u64,
        max_success_rate: f64,
    ) -> bool {
        self.inner
            .read()
            .data
            .sources
            .get(source)
            .is_some_and(|s| s.samples() >= min_samples && s.success_rate <= max_success_rate)
    }

    /// [`Self::should_throttle_source`] with the configured thresholds
    #[must_use]
    pub fn should_throttle(&self, source: &str) -> bool {
        self.should_throttle_source(
            source,
            self.config.throttle_min_samples,
            self.config.throttle_max_success_rate,
        )
    }

    /// Blend `base_confidence` 50/50 with the pattern's success rate once the
    /// pattern has `confidence_min_samples` outcomes
    #[must_use]
    pub fn get_adjusted_confidence(&self, url: &str, source: &str, base_confidence: f64) -> f64 {
        let pattern = generalize(url);
        let inner = self.inner.read();
        match inner.data.patterns.get(&pattern) {
            Some(p) if p.samples() >= self.config.confidence_min_samples => {
                let adjusted = 0.5 * base_confidence + 0.5 * p.success_rate;
                debug!(
                    "Confidence for {pattern} ({source}): {base_confidence:.2} -> {adjusted:.2}"
                );
                adjusted
            }
            _ => base_confidence,
        }
    }

    /// Compare the mean success rate of the older half of `source`'s recent
    /// sessions with the newer half
    #[must_use]
    pub fn source_trend(&self, source: &str) -> Trend {
        let inner = self.inner.read();
        trend_of(&inner.data, source, self.config.trend_threshold)
    }

    #[must_use]
    pub fn pattern_stats(&self, pattern: &str) -> Option<PatternStats> {
        self.inner.read().data.patterns.get(pattern).cloned()
    }

    #[must_use]
    pub fn source_stats(&self, source: &str) -> Option<SourceStats> {
        self.inner.read().data.sources.get(source).cloned()
    }

    #[must_use]
    pub fn session_history(&self) -> Vec<SessionStats> {
        self.inner.read().data.session_history.clone()
    }

    /// Snapshot of the persisted data
    #[must_use]
    pub fn data(&self) -> FeedbackData {
        self.inner.read().data.clone()
    }

    #[must_use]
    pub fn quality_report(&self) -> QualityReport {
        let inner = self.inner.read();
        let data = &inner.data;
        let cfg = &self.config;

        let mut sources: Vec<SourceReport> = data
            .sources
            .values()
            .map(|s| SourceReport {
                stats: s.clone(),
                trend: trend_of(data, &s.source, cfg.trend_threshold),
                throttled: s.samples() >= cfg.throttle_min_samples
                    && s.success_rate <= cfg.throttle_max_success_rate,
            })
            .collect();
        sources.sort_by(|a, b| {
            b.stats
                .success_rate
                .total_cmp(&a.stats.success_rate)
                .then_with(|| a.stats.source.cmp(&b.stats.source))
        });

        let throttled_sources = sources
            .iter()
            .filter(|s| s.throttled)
            .map(|s| s.stats.source.clone())
            .collect();
        let low_quality_patterns = data
            .patterns
            .values()
            .filter(|p| {
                p.samples() >= cfg.low_quality_min_samples
                    && p.success_rate <= cfg.low_quality_max_success_rate
            })
            .map(|p| p.pattern.clone())
            .collect();

        QualityReport {
            sources,
            low_quality_patterns,
            throttled_sources,
            total_patterns: data.patterns.len(),
            sessions_recorded: data.session_history.len(),
            last_updated: data.last_updated,
        }
    }

    /// Forget everything, including the open session
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.data = FeedbackData::default();
        inner.session = None;
        info!("Feedback store reset");
    }

    /// Persist to the feedback file; a no-op for in-memory stores
    ///
    /// # Errors
    ///
    /// Returns [`FeedbackError::Save`] if the atomic write fails.
    pub async fn save(&self) -> Result<(), FeedbackError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let (snapshot, backup) = {
            let mut inner = self.inner.write();
            inner.data.last_updated = Some(Utc::now());
            (inner.data.clone(), inner.backup)
        };
        write_json_atomic_with(path, &snapshot, backup)
            .await
            .map_err(|source| FeedbackError::Save {
                path: path.clone(),
                source,
            })?;
        self.inner.write().backup = BackupPolicy::Rotate;
        debug!("Saved feedback to {}", path.display());
        Ok(())
    }
}

fn trend_of(data: &FeedbackData, source: &str, threshold: f64) -> Trend {
    let rates: Vec<f64> = data
        .session_history
        .iter()
        .filter_map(|s| s.per_source_performance.get(source))
        .filter_map(|p| p.success_rate())
        .collect();
    if rates.len() < 2 {
        return Trend::InsufficientData;
    }

    let mid = rates.len() / 2;
    let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
    let older = mean(&rates[..mid]);
    let newer = mean(&rates[mid..]);

    if older <= 0.0 {
        return if newer > 0.0 { Trend::Improving } else { Trend::Stable };
    }
    let change = (newer - older) / older;
    if change >= threshold {
        Trend::Improving
    } else if change <= -threshold {
        Trend::Declining
    } else {
        Trend::Stable
    }
}
