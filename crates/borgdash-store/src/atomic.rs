//! Atomic file replacement.
//!
//! Content goes to a temporary file in the target's own directory and is
//! renamed over the target, so readers see either the old bytes or the new
//! bytes and never a prefix of them. This module knows nothing about locking
//! or backups.

use crate::{StoreError, StoreResult};
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, trace};

/// Atomically replace the file at `path` with `bytes`.
///
/// Parent directories are created if necessary. Permissions of an existing
/// target are carried over to the new file. On error the target is left
/// exactly as it was and the temporary file is removed.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    write_atomic_with(path, bytes, |_| Ok(()))
}

/// Like [`write_atomic`], running `before_rename` once the temporary file is
/// fully written and synced. An error from the hook aborts the write.
pub(crate) fn write_atomic_with<F>(path: &Path, bytes: &[u8], before_rename: F) -> StoreResult<()>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| StoreError::invalid_path(format!("{} has no parent", path.display())))?;
    let file_name = path
        .file_name()
        .ok_or_else(|| StoreError::invalid_path(format!("{} has no file name", path.display())))?;

    let write_err = |source: io::Error| StoreError::Write {
        path: path.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir).map_err(write_err)?;

    let prefix = format!(".{}.", file_name.to_string_lossy());
    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(write_err)?;
    trace!(temp = %temp.path().display(), "Created temp file");

    temp.write_all(bytes).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;

    match fs::metadata(path) {
        Ok(meta) => fs::set_permissions(temp.path(), meta.permissions()).map_err(write_err)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(write_err(e)),
    }

    // Dropping `temp` on any early return deletes it.
    before_rename(temp.path()).map_err(write_err)?;

    temp.persist(path).map_err(|e| write_err(e.error))?;
    sync_dir(dir);

    debug!(path = %path.display(), bytes = bytes.len(), "Atomically wrote file");
    Ok(())
}

/// Flush the directory entry so the rename survives a crash.
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
        trace!(dir = %dir.display(), error = %e, "Directory sync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}
