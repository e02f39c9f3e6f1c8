//! Concurrent store for the shared borgmatic configuration file.
//!
//! The dashboard's request handlers, its background jobs and the backup tool
//! itself all touch the same YAML file. This crate makes that safe:
//! - Per-path locking, so no update is lost and nothing reads a torn file
//! - Atomic replacement through a temporary file and rename
//! - A rotating set of backup snapshots taken before each overwrite
//! - A parsed-document cache that notices external edits
//! - Live notification of external changes
//! - Structural validation and starter templates
//!
//! # Example
//!
//! ```no_run
//! use borgdash_store::{ConfigStore, StoreConfig};
//! use serde_yaml::Value;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = ConfigStore::open(StoreConfig::default());
//! let path = "/etc/borgmatic/config.yaml";
//!
//! // Change one section; everything else is kept as it was
//! let retention: Value = serde_yaml::from_str("keep_daily: 7\nkeep_weekly: 4")?;
//! store.update_section(path, "retention", retention).await?;
//!
//! // Undo by restoring the snapshot taken before the update
//! let backups = store.list_backups(path).await?;
//! store.restore_backup(path, &backups[0].name).await?;
//! # Ok(())
//! # }
//! ```

mod atomic;
mod backup;
mod cache;
mod config;
mod document;
mod error;
mod lock;
mod store;
mod templates;
mod validate;
mod watcher;

pub use atomic::write_atomic;
pub use backup::{BackupRotator, BackupSnapshot};
pub use cache::{CacheEntry, DocumentCache, FileFingerprint};
pub use config::{BackupPolicy, CacheValidation, StoreConfig, DEFAULT_BACKUP_DIR_NAME, DEFAULT_RETENTION};
pub use document::ConfigDocument;
pub use error::{StoreError, StoreResult};
pub use lock::{PathGuard, PathLocks};
pub use store::ConfigStore;
pub use templates::ConfigTemplate;
pub use validate::{validate, validate_text, ValidationReport};
pub use watcher::{WatchCallback, WatchEvent, WatchSubscription};

/// Built-in configuration templates.
pub fn templates() -> &'static [ConfigTemplate] {
    templates::builtin()
}

/// Look up a built-in template by name.
pub fn template(name: &str) -> Option<&'static ConfigTemplate> {
    templates::find(name)
}
