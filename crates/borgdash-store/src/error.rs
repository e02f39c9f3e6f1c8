//! Store error types.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
///
/// Validation problems are never reported through this type; see
/// [`crate::ValidationReport`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// Config file or backup snapshot does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path cannot be resolved to an absolute file path.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Gave up waiting for exclusive access to a path.
    #[error("timed out after {waited:?} waiting for lock on {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    /// File contents are not a valid configuration document.
    #[error("{}", format_serialization(path, message, *line, *column))]
    Serialization {
        path: Option<PathBuf>,
        message: String,
        line: Option<usize>,
        column: Option<usize>,
    },

    /// Reading the config file failed for a reason other than absence.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Atomic write failed; the target file is untouched.
    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Taking or pruning a backup snapshot failed.
    #[error("backup of {} failed: {source}", path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Filesystem notifications could not be set up.
    #[error("failed to watch {}: {source}", path.display())]
    WatchSetup {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    /// The store was closed.
    #[error("store is closed")]
    Closed,

    /// Background task failed (panicked or was cancelled).
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Create a not found error for a config path.
    pub fn not_found(path: &Path) -> Self {
        Self::NotFound(path.display().to_string())
    }

    /// Create an invalid path error.
    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::InvalidPath(message.into())
    }

    /// Wrap a YAML error, keeping its location when available.
    pub fn serialization(path: Option<&Path>, err: &serde_yaml::Error) -> Self {
        let location = err.location();
        Self::Serialization {
            path: path.map(Path::to_path_buf),
            message: err.to_string(),
            line: location.as_ref().map(|l| l.line()),
            column: location.as_ref().map(|l| l.column()),
        }
    }

    /// Whether the caller may reasonably retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }
}

fn format_serialization(
    path: &Option<PathBuf>,
    message: &str,
    line: Option<usize>,
    column: Option<usize>,
) -> String {
    let mut out = String::from("invalid configuration");
    if let Some(path) = path {
        out.push_str(&format!(" in {}", path.display()));
    }
    match (line, column) {
        (Some(line), Some(column)) => out.push_str(&format!(" at line {line}, column {column}")),
        (Some(line), None) => out.push_str(&format!(" at line {line}")),
        _ => {}
    }
    out.push_str(": ");
    out.push_str(message);
    out
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(err.to_string())
    }
}
