//! Crash-safe, resumable checkpoint store for one pipeline stage
//!
//! State lives behind a synchronous lock so `should_skip` stays O(1) and
//! callable from anywhere. Writes are serialized by a separate async lock and
//! always persist the *latest* state, so a slow writer can never overwrite a
//! newer snapshot with an older one.
//!
//! Forced writes: the first write after `start`, any update that moves
//! `last_processed_index`, and every lifecycle transition. Everything else is
//! throttled to one write per `save_interval` updates.

use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

use super::fingerprint::{InputCheck, check_input};
use super::types::{
    CheckpointState, CheckpointStatus, Progress, ProgressDelta, ResumePoint, StageSummary,
};
use crate::config::CheckpointConfig;
use crate::utils::{BackupPolicy, LoadSource, read_json_with_backup, write_json_atomic_with};

/// Error types for checkpoint operations
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    /// Reading the checkpoint directory failed
    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A checkpoint file exists but is not a valid checkpoint
    #[error("Checkpoint parse error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The requested lifecycle transition is not valid from the current status
    #[error("Stage '{stage}': cannot {action} while {from}")]
    InvalidTransition {
        stage: String,
        from: CheckpointStatus,
        action: &'static str,
    },

    /// Repeated write failures; the stage must stop
    #[error("Stage '{stage}': checkpoint write failed {attempts} times in a row: {message}")]
    PersistenceExhausted {
        stage: String,
        attempts: u32,
        message: String,
    },
}

struct StoreInner {
    state: CheckpointState,
    updates_since_save: u64,
    /// A previous write failed; the next update must retry it
    write_pending: bool,
    consecutive_write_failures: u32,
    /// `Keep` until the first successful write replaces an untrusted primary
    backup: BackupPolicy,
}

/// Durable progress record of a single stage
pub struct CheckpointStore {
    path: PathBuf,
    config: CheckpointConfig,
    inner: Mutex<StoreInner>,
    write_lock: tokio::sync::Mutex<()>,
}

impl CheckpointStore {
    /// Path of the checkpoint file for `stage` inside `dir`
    #[must_use]
    pub fn file_path(dir: &Path, stage: &str) -> PathBuf {
        dir.join(format!("{stage}.json"))
    }

    /// Open (or create) the checkpoint of `stage` in `dir`
    ///
    /// A recovered `RUNNING` status means the previous process died mid-run and
    /// is reported as `RECOVERING`. A corrupt primary file falls back to the
    /// backup copy and is also reported as `RECOVERING`.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] when the directory cannot be created.
    pub async fn open(
        dir: &Path,
        stage: &str,
        config: CheckpointConfig,
    ) -> Result<Self, CheckpointError> {
        tokio::fs::create_dir_all(dir).await?;
        let path = Self::file_path(dir, stage);

        let loaded = read_json_with_backup::<CheckpointState>(&path).await;
        let (state, recovered, backup) = match loaded {
            Ok(Some((mut state, source))) => {
                let crashed = state.status == CheckpointStatus::Running;
                let from_backup = source == LoadSource::Backup;
                if crashed || from_backup {
                    info!(
                        "Stage '{stage}' recovering (status was {}, loaded from {})",
                        state.status,
                        if from_backup { "backup" } else { "primary" }
                    );
                    state.status = CheckpointStatus::Recovering;
                }
                (state, crashed || from_backup, BackupPolicy::after_load(source))
            }
            Ok(None) => {
                debug!("No checkpoint for stage '{stage}', starting fresh");
                (CheckpointState::new(stage), false, BackupPolicy::Rotate)
            }
            Err(e) => {
                error!(
                    "Checkpoint for stage '{stage}' and its backup are unreadable ({e}); starting fresh"
                );
                (CheckpointState::new(stage), false, BackupPolicy::Keep)
            }
        };

        let store = Self {
            path,
            config,
            inner: Mutex::new(StoreInner {
                state,
                updates_since_save: 0,
                write_pending: false,
                consecutive_write_failures: 0,
                backup,
            }),
            write_lock: tokio::sync::Mutex::new(()),
        };

        if recovered {
            // Persist RECOVERING before anyone resumes from it
            store.save().await?;
        }
        Ok(store)
    }

    /// Location of the primary checkpoint file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn stage_name(&self) -> String {
        self.inner.lock().state.stage_name.clone()
    }

    /// Snapshot of the full state
    #[must_use]
    pub fn state(&self) -> CheckpointState {
        self.inner.lock().state.clone()
    }

    #[must_use]
    pub fn status(&self) -> CheckpointStatus {
        self.inner.lock().state.status
    }

    #[must_use]
    pub fn progress(&self) -> Progress {
        self.inner.lock().state.progress.clone()
    }

    #[must_use]
    pub fn summary(&self) -> StageSummary {
        StageSummary::from(&self.inner.lock().state)
    }

    /// True for every index at or below `last_processed_index`
    #[must_use]
    pub fn should_skip(&self, index: u64) -> bool {
        self.inner.lock().state.should_skip(index)
    }

    /// Where a resumed run should continue, if there is anything to resume
    #[must_use]
    pub fn get_resume_point(&self) -> Option<ResumePoint> {
        let inner = self.inner.lock();
        let state = &inner.state;
        if matches!(
            state.status,
            CheckpointStatus::Initialized | CheckpointStatus::Completed
        ) {
            return None;
        }
        state.last_processed_index.map(|last| ResumePoint {
            next_index: last + 1,
            last_item: state.last_processed_item.clone(),
            processed: state.progress.processed,
        })
    }

    /// Begin (or continue) a run over `total_items` items
    ///
    /// From `RECOVERING`, `PAUSED` or `FAILED` with a matching (or absent)
    /// fingerprint the previous counters and resume index are kept. Otherwise
    /// the stage starts from scratch.
    ///
    /// # Errors
    ///
    /// Fails with [`CheckpointError::InvalidTransition`] if already `RUNNING`,
    /// or [`CheckpointError::PersistenceExhausted`] on repeated write failures.
    pub async fn start(
        &self,
        total_items: u64,
        input_fingerprint: Option<String>,
    ) -> Result<(), CheckpointError> {
        {
            let mut inner = self.inner.lock();
            let state = &mut inner.state;
            if state.status == CheckpointStatus::Running {
                return Err(self.invalid(state, "start"));
            }

            let same_input = match (&state.input_file_fingerprint, &input_fingerprint) {
                (Some(old), Some(new)) => old == new,
                _ => true,
            };

            if state.status.is_resumable() && same_input {
                info!(
                    "Stage '{}' resuming after index {:?} ({} processed)",
                    state.stage_name, state.last_processed_index, state.progress.processed
                );
                state.progress.total = total_items;
                if state.progress.start_time.is_none() {
                    state.progress.start_time = Some(Utc::now());
                }
                state.progress.last_update_time = Some(Utc::now());
            } else {
                if !same_input {
                    warn!(
                        "Stage '{}' input changed since last run; discarding previous progress",
                        state.stage_name
                    );
                }
                state.progress = Progress::restarted(total_items);
                state.last_processed_index = None;
                state.last_processed_item = None;
                state.error_count = 0;
                state.last_error = None;
            }

            if input_fingerprint.is_some() {
                state.input_file_fingerprint = input_fingerprint;
            }
            state.status = CheckpointStatus::Running;
        }
        self.save().await
    }

    /// Apply a progress increment
    ///
    /// `index` is the new contiguous watermark; moving it forces a durable
    /// write because resume correctness depends on it.
    ///
    /// # Errors
    ///
    /// Fails with [`CheckpointError::InvalidTransition`] unless `RUNNING`, or
    /// [`CheckpointError::PersistenceExhausted`] on repeated write failures.
    pub async fn update_progress(
        &self,
        delta: ProgressDelta,
        last_item: Option<&str>,
        index: Option<u64>,
    ) -> Result<(), CheckpointError> {
        let must_save = {
            let mut inner = self.inner.lock();
            if inner.state.status != CheckpointStatus::Running {
                return Err(self.invalid(&inner.state, "update progress"));
            }

            inner.state.progress.apply(&delta);
            let mut index_moved = false;
            if let Some(index) = index
                && inner.state.last_processed_index != Some(index)
            {
                inner.state.last_processed_index = Some(index);
                inner.state.last_processed_item = last_item.map(str::to_string);
                index_moved = true;
            }

            inner.updates_since_save += 1;
            index_moved
                || inner.write_pending
                || inner.updates_since_save >= self.config.save_interval
        };

        if must_save {
            self.save().await?;
        }
        Ok(())
    }

    /// Mark the stage as finished
    ///
    /// # Errors
    ///
    /// Fails unless `RUNNING` or `RECOVERING`, or on repeated write failures.
    pub async fn complete(&self) -> Result<(), CheckpointError> {
        self.transition("complete", CheckpointStatus::Completed, |s| {
            matches!(s, CheckpointStatus::Running | CheckpointStatus::Recovering)
        })
        .await
    }

    /// Mark the stage as failed with `message`
    ///
    /// # Errors
    ///
    /// Fails from a terminal status, or on repeated write failures.
    pub async fn fail(&self, message: &str) -> Result<(), CheckpointError> {
        {
            let mut inner = self.inner.lock();
            if inner.state.status.is_terminal() {
                return Err(self.invalid(&inner.state, "fail"));
            }
            warn!("Stage '{}' failed: {message}", inner.state.stage_name);
            inner.state.status = CheckpointStatus::Failed;
            inner.state.error_count += 1;
            inner.state.last_error = Some(message.to_string());
            inner.state.progress.last_update_time = Some(Utc::now());
        }
        self.save().await
    }

    /// Stop cooperatively; the stage can be resumed later
    ///
    /// # Errors
    ///
    /// Fails unless `RUNNING` or `RECOVERING`, or on repeated write failures.
    pub async fn pause(&self) -> Result<(), CheckpointError> {
        self.transition("pause", CheckpointStatus::Paused, |s| {
            matches!(s, CheckpointStatus::Running | CheckpointStatus::Recovering)
        })
        .await
    }

    /// Continue a paused or recovering stage
    ///
    /// # Errors
    ///
    /// Fails unless `PAUSED` or `RECOVERING`, or on repeated write failures.
    pub async fn resume(&self) -> Result<(), CheckpointError> {
        self.transition("resume", CheckpointStatus::Running, |s| {
            matches!(s, CheckpointStatus::Paused | CheckpointStatus::Recovering)
        })
        .await
    }

    /// Back to `INITIALIZED`, keeping only the item total for re-queuing
    ///
    /// # Errors
    ///
    /// Fails on repeated write failures.
    pub async fn reset(&self) -> Result<(), CheckpointError> {
        {
            let mut inner = self.inner.lock();
            let state = &mut inner.state;
            info!("Resetting stage '{}'", state.stage_name);
            state.status = CheckpointStatus::Initialized;
            state.progress = state.progress.cleared();
            state.last_processed_index = None;
            state.last_processed_item = None;
            state.error_count = 0;
            state.last_error = None;
        }
        self.save().await
    }

    /// Compare `input` with the fingerprint recorded at `start`
    pub async fn validate_input(&self, input: &Path) -> InputCheck {
        let recorded = self.inner.lock().state.input_file_fingerprint.clone();
        check_input(input, recorded.as_deref()).await
    }

    /// Attach free-form metadata; persisted with the next write
    pub fn set_metadata(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.lock().state.metadata.insert(key.into(), value);
    }

    /// Force a durable write of the current state
    ///
    /// # Errors
    ///
    /// Fails on repeated write failures.
    pub async fn flush(&self) -> Result<(), CheckpointError> {
        self.save().await
    }

    async fn transition(
        &self,
        action: &'static str,
        to: CheckpointStatus,
        allowed_from: impl Fn(CheckpointStatus) -> bool,
    ) -> Result<(), CheckpointError> {
        {
            let mut inner = self.inner.lock();
            if !allowed_from(inner.state.status) {
                return Err(self.invalid(&inner.state, action));
            }
            debug!(
                "Stage '{}' {} -> {}",
                inner.state.stage_name, inner.state.status, to
            );
            inner.state.status = to;
            inner.state.progress.last_update_time = Some(Utc::now());
        }
        self.save().await
    }

    fn invalid(&self, state: &CheckpointState, action: &'static str) -> CheckpointError {
        CheckpointError::InvalidTransition {
            stage: state.stage_name.clone(),
            from: state.status,
            action,
        }
    }

    /// Persist the latest state
    ///
    /// A failed write is logged and retried on the next update; only
    /// `max_write_failures` consecutive failures surface as an error.
    async fn save(&self) -> Result<(), CheckpointError> {
        let _guard = self.write_lock.lock().await;
        let (snapshot, backup) = {
            let inner = self.inner.lock();
            (inner.state.clone(), inner.backup)
        };

        match write_json_atomic_with(&self.path, &snapshot, backup).await {
            Ok(()) => {
                let mut inner = self.inner.lock();
                inner.backup = BackupPolicy::Rotate;
                inner.updates_since_save = 0;
                inner.write_pending = false;
                inner.consecutive_write_failures = 0;
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.lock();
                inner.write_pending = true;
                inner.consecutive_write_failures += 1;
                let attempts = inner.consecutive_write_failures;
                if attempts >= self.config.max_write_failures {
                    error!(
                        "Checkpoint write for stage '{}' failed {attempts} times: {e}",
                        snapshot.stage_name
                    );
                    return Err(CheckpointError::PersistenceExhausted {
                        stage: snapshot.stage_name,
                        attempts,
                        message: e.to_string(),
                    });
                }
                warn!(
                    "Checkpoint write for stage '{}' failed ({attempts}/{}): {e}; will retry",
                    snapshot.stage_name, self.config.max_write_failures
                );
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(save_interval: u64) -> CheckpointConfig {
        CheckpointConfig {
            save_interval,
            max_write_failures: 3,
        }
    }

    async fn on_disk(store: &CheckpointStore) -> CheckpointState {
        let bytes = tokio::fs::read(store.path()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_throttled_updates_skip_disk() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path(), "validation", config(5))
            .await
            .unwrap();
        store.start(100, None).await.unwrap();

        for _ in 0..4 {
            store
                .update_progress(ProgressDelta::success(), None, None)
                .await
                .unwrap();
        }
        assert_eq!(on_disk(&store).await.progress.processed, 0);

        store
            .update_progress(ProgressDelta::success(), None, None)
            .await
            .unwrap();
        assert_eq!(on_disk(&store).await.progress.processed, 5);
    }

    #[tokio::test]
    async fn test_index_move_forces_write() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path(), "validation", config(1000))
            .await
            .unwrap();
        store.start(10, None).await.unwrap();
        store
            .update_progress(ProgressDelta::success(), Some("https://a.edu/"), Some(0))
            .await
            .unwrap();

        let state = on_disk(&store).await;
        assert_eq!(state.last_processed_index, Some(0));
        assert_eq!(state.last_processed_item.as_deref(), Some("https://a.edu/"));
    }

    #[tokio::test]
    async fn test_update_requires_running() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path(), "s", config(1)).await.unwrap();
        let err = store
            .update_progress(ProgressDelta::success(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CheckpointError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_reset_preserves_total() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path(), "s", config(1)).await.unwrap();
        store.start(42, None).await.unwrap();
        store
            .update_progress(ProgressDelta::failure(), None, Some(3))
            .await
            .unwrap();
        store.fail("boom").await.unwrap();
        store.reset().await.unwrap();

        let state = store.state();
        assert_eq!(state.status, CheckpointStatus::Initialized);
        assert_eq!(state.progress.total, 42);
        assert_eq!(state.progress.processed, 0);
        assert_eq!(state.last_processed_index, None);
        assert_eq!(state.error_count, 0);
        assert!(store.get_resume_point().is_none());
    }

    #[tokio::test]
    async fn test_write_failure_escalates() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointStore::open(dir.path(), "s", config(1)).await.unwrap();
        store.start(10, None).await.unwrap();

        // A directory where the temp file should go makes every write fail
        std::fs::create_dir(crate::utils::temp_path(store.path())).unwrap();

        store
            .update_progress(ProgressDelta::success(), None, None)
            .await
            .unwrap();
        store
            .update_progress(ProgressDelta::success(), None, None)
            .await
            .unwrap();
        let err = store
            .update_progress(ProgressDelta::success(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckpointError::PersistenceExhausted { attempts: 3, .. }
        ));
        // In-memory accounting kept going
        assert_eq!(store.progress().processed, 3);
    }
}
