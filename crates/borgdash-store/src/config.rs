//! Store configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Number of backup snapshots kept per config basename.
pub const DEFAULT_RETENTION: usize = 3;

/// Name of the sibling directory that holds backup snapshots.
pub const DEFAULT_BACKUP_DIR_NAME: &str = ".borgdash-backups";

/// What to do when the pre-write backup snapshot cannot be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupPolicy {
    /// Abort the write; the live file is left untouched.
    #[default]
    Required,
    /// Log a warning and write anyway.
    BestEffort,
}

/// How a cached document is checked against the file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheValidation {
    /// Compare modification time and size only (one `stat` per read).
    #[default]
    ModifiedTime,
    /// Additionally hash the file contents. Catches edits that land within
    /// the filesystem's mtime resolution, at the cost of reading the file.
    ContentHash,
}

/// Configuration for a [`crate::ConfigStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Maximum time an operation waits for the path lock.
    #[serde(with = "duration_millis")]
    pub lock_timeout: Duration,

    /// Failure policy for pre-write backups.
    pub backup_policy: BackupPolicy,

    /// Snapshots kept per basename. Values below 1 are treated as 1.
    pub retention: usize,

    /// Directory for backup snapshots. Defaults to a hidden directory next
    /// to each config file.
    pub backup_dir: Option<PathBuf>,

    /// Whether reads may be served from the in-memory cache.
    pub cache_enabled: bool,

    /// Staleness check used for cache hits.
    pub cache_validation: CacheValidation,

    /// Quiet period after the last filesystem event before reloading.
    #[serde(with = "duration_millis")]
    pub watch_debounce: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            backup_policy: BackupPolicy::Required,
            retention: DEFAULT_RETENTION,
            backup_dir: None,
            cache_enabled: true,
            cache_validation: CacheValidation::ModifiedTime,
            watch_debounce: Duration::from_millis(200),
        }
    }
}

impl StoreConfig {
    /// Set the lock timeout.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the backup policy.
    pub fn with_backup_policy(mut self, policy: BackupPolicy) -> Self {
        self.backup_policy = policy;
        self
    }

    /// Set a fixed backup directory.
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Set the cache validation mode.
    pub fn with_cache_validation(mut self, validation: CacheValidation) -> Self {
        self.cache_validation = validation;
        self
    }

    /// Set the watcher debounce interval.
    pub fn with_watch_debounce(mut self, debounce: Duration) -> Self {
        self.watch_debounce = debounce;
        self
    }

    /// Effective retention count.
    pub fn retention(&self) -> usize {
        self.retention.max(1)
    }

    /// Backup directory used for the config file at `path`.
    pub fn backup_dir_for(&self, path: &Path) -> PathBuf {
        match &self.backup_dir {
            Some(dir) => dir.clone(),
            None => path
                .parent()
                .unwrap_or_else(|| Path::new("/"))
                .join(DEFAULT_BACKUP_DIR_NAME),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
