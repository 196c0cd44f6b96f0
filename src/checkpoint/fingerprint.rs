//! Input file fingerprints
//!
//! A fingerprint is `<size>:<xxh3-128 hex>` of the file contents. It is
//! recorded at `start` and compared on the next run to detect a changed or
//! missing upstream file.

use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use xxhash_rust::xxh3::Xxh3;

const READ_CHUNK: usize = 64 * 1024;

/// Fingerprint the contents of `path`
///
/// # Errors
///
/// Returns any I/O error from opening or reading the file.
pub async fn fingerprint_file(path: &Path) -> io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Xxh3::new();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut size: u64 = 0;

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }

    Ok(format!("{size}:{:032x}", hasher.digest128()))
}

/// Result of comparing an input file against the recorded fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCheck {
    /// Same contents as last run
    Valid,
    /// Nothing recorded yet; any input is acceptable
    FirstRun,
    /// The file no longer exists
    Missing { path: PathBuf },
    /// The file changed between runs
    Changed { expected: String, actual: String },
    /// The file exists but could not be read
    Unreadable { path: PathBuf, message: String },
}

impl InputCheck {
    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Valid | Self::FirstRun)
    }

    /// Human-readable reason
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Valid => "input unchanged since last run".to_string(),
            Self::FirstRun => "no previous fingerprint recorded".to_string(),
            Self::Missing { path } => format!("input file missing: {}", path.display()),
            Self::Changed { expected, actual } => {
                format!("input file changed since last run (expected {expected}, found {actual})")
            }
            Self::Unreadable { path, message } => {
                format!("input file unreadable: {}: {message}", path.display())
            }
        }
    }

    /// `(ok, reason)` pair
    #[must_use]
    pub fn into_pair(self) -> (bool, String) {
        (self.is_ok(), self.reason())
    }
}

/// Compare the file at `path` with `recorded`
pub async fn check_input(path: &Path, recorded: Option<&str>) -> InputCheck {
    let actual = match fingerprint_file(path).await {
        Ok(fp) => fp,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return InputCheck::Missing {
                path: path.to_path_buf(),
            };
        }
        Err(e) => {
            return InputCheck::Unreadable {
                path: path.to_path_buf(),
                message: e.to_string(),
            };
        }
    };

    match recorded {
        None => InputCheck::FirstRun,
        Some(expected) if expected == actual => InputCheck::Valid,
        Some(expected) => InputCheck::Changed {
            expected: expected.to_string(),
            actual,
        },
    }
}
