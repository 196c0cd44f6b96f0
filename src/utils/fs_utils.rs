//! Atomic JSON persistence shared by the checkpoint and feedback stores.
//!
//! Write order: serialize, write `<file>.tmp`, fsync, copy the current file to
//! `<file>.backup`, rename the temp file over the primary. A reader therefore
//! sees either the previous complete file or the new complete file, and a
//! crash at any point leaves at least one parseable copy behind.
//!
//! After a load fell back to the backup the primary is known bad, so the next
//! write uses [`BackupPolicy::Keep`] and leaves the good backup in place.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Path of the staging file for `path` (`state.json` -> `state.json.tmp`)
#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    append_extension(path, "tmp")
}

/// Path of the rotated previous copy (`state.json` -> `state.json.backup`)
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    append_extension(path, "backup")
}

fn append_extension(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Which copy a value was recovered from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    /// The primary file parsed cleanly
    Primary,
    /// The primary was missing or corrupt; the backup was used
    Backup,
}

/// Whether a write copies the current primary over the backup first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupPolicy {
    /// The primary is the last good copy; rotate it into the backup
    Rotate,
    /// The primary is untrusted; leave the backup as it is
    Keep,
}

impl BackupPolicy {
    /// Policy for the first write after loading from `source`
    #[must_use]
    pub const fn after_load(source: LoadSource) -> Self {
        match source {
            LoadSource::Primary => Self::Rotate,
            LoadSource::Backup => Self::Keep,
        }
    }
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it
///
/// # Errors
///
/// Returns an I/O error if any step fails. Serialization errors are mapped to
/// `io::ErrorKind::InvalidData`. On error the primary file is untouched.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    write_json_atomic_with(path, value, BackupPolicy::Rotate).await
}

/// [`write_json_atomic`] with an explicit [`BackupPolicy`]
///
/// # Errors
///
/// Same as [`write_json_atomic`].
pub async fn write_json_atomic_with<T: Serialize>(
    path: &Path,
    value: &T,
    backup: BackupPolicy,
) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }

    let tmp = temp_path(path);
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(&json).await?;
    // Sync before rename so the promoted file is durable
    file.sync_all().await?;
    drop(file);

    if backup == BackupPolicy::Rotate && fs::try_exists(path).await? {
        fs::copy(path, backup_path(path)).await?;
    }

    fs::rename(&tmp, path).await?;
    Ok(())
}

/// Load a JSON value written by [`write_json_atomic`]
///
/// Tries the primary file first and falls back to the backup when the primary
/// is missing or fails to parse. Returns `Ok(None)` when neither copy exists.
///
/// # Errors
///
/// Returns the primary's error when both copies exist but neither parses.
pub async fn read_json_with_backup<T: DeserializeOwned>(
    path: &Path,
) -> io::Result<Option<(T, LoadSource)>> {
    let primary_err = match read_json::<T>(path).await {
        Ok(Some(value)) => return Ok(Some((value, LoadSource::Primary))),
        Ok(None) => None,
        Err(e) => {
            log::warn!("Failed to parse {}: {e}; trying backup", path.display());
            Some(e)
        }
    };

    match read_json::<T>(&backup_path(path)).await {
        Ok(Some(value)) => Ok(Some((value, LoadSource::Backup))),
        Ok(None) => match primary_err {
            Some(e) => Err(e),
            None => Ok(None),
        },
        Err(backup_err) => Err(primary_err.unwrap_or(backup_err)),
    }
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        n: u32,
    }

    #[test]
    fn test_sibling_paths() {
        let p = Path::new("/tmp/ckpt/validation.json");
        assert_eq!(temp_path(p), PathBuf::from("/tmp/ckpt/validation.json.tmp"));
        assert_eq!(backup_path(p), PathBuf::from("/tmp/ckpt/validation.json.backup"));
    }

    #[tokio::test]
    async fn test_write_rotates_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");

        write_json_atomic(&path, &Doc { n: 1 }).await.unwrap();
        assert!(!backup_path(&path).exists());
        write_json_atomic(&path, &Doc { n: 2 }).await.unwrap();

        let backup: Doc =
            serde_json::from_slice(&std::fs::read(backup_path(&path)).unwrap()).unwrap();
        assert_eq!(backup, Doc { n: 1 });
        assert!(!temp_path(&path).exists());

        let (doc, source) = read_json_with_backup::<Doc>(&path).await.unwrap().unwrap();
        assert_eq!(doc, Doc { n: 2 });
        assert_eq!(source, LoadSource::Primary);
    }

    #[tokio::test]
    async fn test_corrupt_primary_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");

        write_json_atomic(&path, &Doc { n: 1 }).await.unwrap();
        write_json_atomic(&path, &Doc { n: 2 }).await.unwrap();
        std::fs::write(&path, b"{\"n\": ").unwrap();

        let (doc, source) = read_json_with_backup::<Doc>(&path).await.unwrap().unwrap();
        assert_eq!(doc, Doc { n: 1 });
        assert_eq!(source, LoadSource::Backup);
    }

    #[tokio::test]
    async fn test_keep_leaves_backup_after_fallback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");

        write_json_atomic(&path, &Doc { n: 1 }).await.unwrap();
        write_json_atomic(&path, &Doc { n: 2 }).await.unwrap();
        std::fs::write(&path, b"garbage").unwrap();

        let (doc, source) = read_json_with_backup::<Doc>(&path).await.unwrap().unwrap();
        assert_eq!(source, LoadSource::Backup);
        let policy = BackupPolicy::after_load(source);
        assert_eq!(policy, BackupPolicy::Keep);
        write_json_atomic_with(&path, &Doc { n: doc.n + 10 }, policy)
            .await
            .unwrap();

        let backup: Doc =
            serde_json::from_slice(&std::fs::read(backup_path(&path)).unwrap()).unwrap();
        assert_eq!(backup, Doc { n: 1 });
        let (doc, source) = read_json_with_backup::<Doc>(&path).await.unwrap().unwrap();
        assert_eq!(doc, Doc { n: 11 });
        assert_eq!(source, LoadSource::Primary);
    }

    #[tokio::test]
    async fn test_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let loaded = read_json_with_backup::<Doc>(&dir.path().join("nope.json"))
            .await
            .unwrap();
        assert!(loaded.is_none());
    }
}
