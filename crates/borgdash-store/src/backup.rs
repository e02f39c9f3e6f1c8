//! Backup snapshots of the config file.
//!
//! Before every overwrite the current file content is copied into the backup
//! directory as `<basename>.<timestamp>`, with the timestamp in ISO-8601 form
//! using dashes instead of colons. Only the newest `retention` snapshots per
//! basename are kept:
//! ```text
//! .borgdash-backups/
//!   config.yaml.2026-10-16T09-12-44.031207Z
//!   config.yaml.2026-10-16T09-15-02.554810Z
//!   config.yaml.2026-10-16T10-01-37.908113Z
//! ```

use crate::atomic::write_atomic;
use crate::{StoreError, StoreResult};
use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Timestamp suffix used in snapshot names.
const NAME_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.6fZ";

/// Parsing counterpart of [`NAME_TIMESTAMP_FORMAT`].
const PARSE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.fZ";

/// An immutable copy of the config file taken before an overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupSnapshot {
    /// File name, e.g. `config.yaml.2026-10-16T09-12-44.031207Z`.
    pub name: String,

    /// Full path of the snapshot file.
    pub path: PathBuf,

    /// Size of the snapshot in bytes.
    pub size_bytes: u64,

    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

/// Takes, lists and prunes snapshots in one backup directory.
#[derive(Debug, Clone)]
pub struct BackupRotator {
    dir: PathBuf,
    retention: usize,
}

impl BackupRotator {
    /// Create a rotator for `dir` keeping `retention` snapshots per basename.
    pub fn new(dir: impl Into<PathBuf>, retention: usize) -> Self {
        Self {
            dir: dir.into(),
            retention: retention.max(1),
        }
    }

    /// The backup directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy the current content of `path` into a new snapshot.
    ///
    /// Returns `None` when `path` does not exist yet (first write).
    pub fn snapshot(&self, path: &Path) -> StoreResult<Option<BackupSnapshot>> {
        let basename = basename(path)?;
        let backup_err = |source: io::Error| StoreError::Backup {
            path: path.to_path_buf(),
            source,
        };

        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No existing file, skipping backup");
                return Ok(None);
            }
            Err(e) => return Err(backup_err(e)),
        };

        // Names must sort in creation order even if the clock stalls or two
        // writes land in the same microsecond.
        let mut created_at = Utc::now().trunc_subsecs(6);
        if let Some(latest) = self.list(basename)?.first() {
            if latest.created_at >= created_at {
                created_at = latest.created_at + Duration::microseconds(1);
            }
        }

        let name = format!("{}.{}", basename, created_at.format(NAME_TIMESTAMP_FORMAT));
        let snapshot_path = self.dir.join(&name);

        write_atomic(&snapshot_path, &bytes).map_err(|e| match e {
            StoreError::Write { source, .. } => backup_err(source),
            other => other,
        })?;

        info!(
            path = %path.display(),
            snapshot = %name,
            size_bytes = bytes.len(),
            "Created config backup"
        );

        Ok(Some(BackupSnapshot {
            name,
            path: snapshot_path,
            size_bytes: bytes.len() as u64,
            created_at,
        }))
    }

    /// Delete all but the newest `retention` snapshots of `basename`.
    ///
    /// Returns the snapshots that were removed.
    pub fn rotate(&self, basename: &str) -> StoreResult<Vec<BackupSnapshot>> {
        let snapshots = self.list(basename)?;
        let mut removed = Vec::new();

        for snapshot in snapshots.into_iter().skip(self.retention) {
            match fs::remove_file(&snapshot.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StoreError::Backup {
                        path: snapshot.path,
                        source,
                    })
                }
            }
            debug!(snapshot = %snapshot.name, "Pruned old backup");
            removed.push(snapshot);
        }

        if !removed.is_empty() {
            info!(basename, removed = removed.len(), "Rotated config backups");
        }

        Ok(removed)
    }

    /// List snapshots of `basename`, newest first.
    pub fn list(&self, basename: &str) -> StoreResult<Vec<BackupSnapshot>> {
        let prefix = format!("{basename}.");
        let mut snapshots = Vec::new();

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(snapshots),
            Err(source) => {
                return Err(StoreError::Backup {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(dir = %self.dir.display(), error = %e, "Failed to read backup entry");
                    continue;
                }
            };

            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(created_at) = name.strip_prefix(&prefix).and_then(parse_timestamp) else {
                continue;
            };

            match entry.metadata() {
                Ok(meta) if meta.is_file() => snapshots.push(BackupSnapshot {
                    name: name.to_string(),
                    path: entry.path(),
                    size_bytes: meta.len(),
                    created_at,
                }),
                Ok(_) => {}
                Err(e) => warn!(snapshot = %name, error = %e, "Failed to stat backup"),
            }
        }

        snapshots.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.name.cmp(&a.name))
        });

        Ok(snapshots)
    }

    /// Look up a snapshot of `basename` by name.
    pub fn find(&self, basename: &str, name: &str) -> StoreResult<BackupSnapshot> {
        let not_found = || StoreError::NotFound(format!("backup snapshot {name}"));

        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(not_found());
        }
        let created_at = name
            .strip_prefix(&format!("{basename}."))
            .and_then(parse_timestamp)
            .ok_or_else(not_found)?;

        let path = self.dir.join(name);
        if !borgdash_util::path::is_within(&path, &self.dir) {
            return Err(not_found());
        }

        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(BackupSnapshot {
                name: name.to_string(),
                path,
                size_bytes: meta.len(),
                created_at,
            }),
            Ok(_) => Err(not_found()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(not_found()),
            Err(source) => Err(StoreError::Read { path, source }),
        }
    }

    /// Read the content of a snapshot.
    pub fn read(&self, snapshot: &BackupSnapshot) -> StoreResult<Vec<u8>> {
        fs::read(&snapshot.path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                StoreError::NotFound(format!("backup snapshot {}", snapshot.name))
            } else {
                StoreError::Read {
                    path: snapshot.path.clone(),
                    source: e,
                }
            }
        })
    }
}

/// File name of a config path, as used for snapshot names.
pub(crate) fn basename(path: &Path) -> StoreResult<&str> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StoreError::invalid_path(format!("{} has no file name", path.display())))
}

fn parse_timestamp(suffix: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(suffix, PARSE_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
