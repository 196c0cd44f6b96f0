//! One checkpoint directory holding a store per pipeline stage

use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use super::store::{CheckpointError, CheckpointStore};
use super::types::{CheckpointState, StageSummary};
use crate::config::CheckpointConfig;
use crate::utils::{backup_path, temp_path};

/// Owns the checkpoint directory of a pipeline run
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    config: CheckpointConfig,
}

impl CheckpointManager {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, config: CheckpointConfig) -> Self {
        Self {
            dir: dir.into(),
            config,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Open the store of `stage`, recovering it if the last run crashed
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] if the directory cannot be created.
    pub async fn open_stage(&self, stage: &str) -> Result<CheckpointStore, CheckpointError> {
        CheckpointStore::open(&self.dir, stage, self.config.clone()).await
    }

    /// Summaries of every stage with a checkpoint in the directory, by name
    ///
    /// Files that fail to parse are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] if the directory cannot be listed.
    pub async fn stage_summaries(&self) -> Result<Vec<StageSummary>, CheckpointError> {
        let mut summaries = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(summaries),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_state(&path).await {
                Ok(state) => summaries.push(StageSummary::from(&state)),
                Err(e) => warn!("Skipping unreadable checkpoint {}: {e}", path.display()),
            }
        }

        summaries.sort_by(|a, b| a.stage_name.cmp(&b.stage_name));
        Ok(summaries)
    }

    /// Remove the checkpoint of `stage` together with its backup and temp files
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError::Io`] for any failure other than a missing file.
    pub async fn clear_stage(&self, stage: &str) -> Result<(), CheckpointError> {
        let primary = CheckpointStore::file_path(&self.dir, stage);
        for path in [backup_path(&primary), temp_path(&primary), primary] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        info!("Cleared checkpoint for stage '{stage}'");
        Ok(())
    }
}

async fn read_state(path: &Path) -> Result<CheckpointState, CheckpointError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointStatus;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_summaries_and_clear() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path(), CheckpointConfig::default());

        let discovery = manager.open_stage("discovery").await.unwrap();
        discovery.start(3, None).await.unwrap();
        discovery.complete().await.unwrap();
        let validation = manager.open_stage("validation").await.unwrap();
        validation.start(7, None).await.unwrap();

        std::fs::write(dir.path().join("garbage.json"), "{not json").unwrap();

        let summaries = manager.stage_summaries().await.unwrap();
        let names: Vec<_> = summaries.iter().map(|s| s.stage_name.as_str()).collect();
        assert_eq!(names, ["discovery", "validation"]);
        assert_eq!(summaries[0].status, CheckpointStatus::Completed);
        assert_eq!(summaries[1].total, 7);

        manager.clear_stage("discovery").await.unwrap();
        assert!(!CheckpointStore::file_path(dir.path(), "discovery").exists());
        assert_eq!(manager.stage_summaries().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_dir_has_no_summaries() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::new(dir.path().join("nope"), CheckpointConfig::default());
        assert!(manager.stage_summaries().await.unwrap().is_empty());
    }
}
