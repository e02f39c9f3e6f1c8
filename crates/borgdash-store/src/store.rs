//! The configuration store.
//!
//! Every operation on a path runs with that path's lock held, reads included.
//! The write path moves through a fixed sequence of states:
//!
//! ```text
//! Idle -> Locked(Writing) -> BackupTaken -> TempWritten -> Renamed -> CacheUpdated -> Idle
//! ```
//!
//! An error anywhere before `Renamed` leaves the file on disk untouched.
//! Filesystem work runs on the blocking pool.

use crate::atomic::{write_atomic, write_atomic_with};
use crate::backup::{basename, BackupRotator, BackupSnapshot};
use crate::cache::{read_with_fingerprint, CacheEntry, DocumentCache, FileFingerprint};
use crate::config::{BackupPolicy, StoreConfig};
use crate::lock::PathLocks;
use crate::templates::{self, ConfigTemplate};
use crate::validate::{self, ValidationReport};
use crate::watcher::{WatchCallback, WatchEvent, WatchSubscription, Watchers};
use crate::{ConfigDocument, StoreError, StoreResult};
use borgdash_util::{Identifier, TimingGuard};
use serde_yaml::Value;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

/// Concurrent store for borgmatic configuration files.
///
/// Cheap to clone; clones share locks, cache and watchers. Separate
/// [`ConfigStore::open`] calls create fully independent stores.
#[derive(Clone)]
pub struct ConfigStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: StoreConfig,
    locks: Arc<PathLocks>,
    cache: Arc<DocumentCache>,
    watchers: Watchers,
    closed: AtomicBool,
}

impl ConfigStore {
    /// Create a store.
    pub fn open(config: StoreConfig) -> Self {
        let locks = Arc::new(PathLocks::new(config.lock_timeout));
        let cache = Arc::new(DocumentCache::new(config.cache_validation));
        let watchers = Watchers::new(Arc::clone(&locks), Arc::clone(&cache), config.watch_debounce);

        debug!(
            lock_timeout = ?config.lock_timeout,
            retention = config.retention(),
            backup_policy = ?config.backup_policy,
            "Opened config store"
        );

        Self {
            inner: Arc::new(StoreInner {
                config,
                locks,
                cache,
                watchers,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Stop all watchers and drop cached documents. Later operations fail
    /// with [`StoreError::Closed`].
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.watchers.shutdown();
        self.inner.cache.clear().await;
        debug!("Closed config store");
    }

    /// The configuration this store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Read and parse the document at `path`.
    ///
    /// With `use_cache`, a cached copy is returned if the file has not
    /// changed since it was parsed.
    pub async fn read(&self, path: impl AsRef<Path>, use_cache: bool) -> StoreResult<ConfigDocument> {
        self.ensure_open()?;
        let guard = self.inner.locks.acquire(path.as_ref()).await?;
        let path = guard.path();
        trace!(path = %path.display(), state = "Locked(Reading)", "Store transition");

        let document = self.load_locked(path, use_cache).await?;

        trace!(path = %path.display(), state = "Idle", "Store transition");
        Ok(document)
    }

    /// Read the raw text of the file at `path`.
    pub async fn read_text(&self, path: impl AsRef<Path>) -> StoreResult<String> {
        self.ensure_open()?;
        let guard = self.inner.locks.acquire(path.as_ref()).await?;
        let path = guard.path().to_path_buf();

        blocking(move || match fs::read_to_string(&path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::not_found(&path)),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => Err(StoreError::Serialization {
                message: format!("file is not valid UTF-8: {e}"),
                path: Some(path),
                line: None,
                column: None,
            }),
            Err(source) => Err(StoreError::Read { path, source }),
        })
        .await
    }

    /// Get one top-level section of the document at `path`.
    pub async fn get_section(&self, path: impl AsRef<Path>, key: &str) -> StoreResult<Option<Value>> {
        let document = self.read(path, true).await?;
        Ok(document.get(key).cloned())
    }

    /// Replace the document at `path`.
    ///
    /// With `create_backup`, the current file content is snapshotted first.
    pub async fn write(
        &self,
        path: impl AsRef<Path>,
        document: &ConfigDocument,
        create_backup: bool,
    ) -> StoreResult<()> {
        self.ensure_open()?;
        let text = document.to_yaml()?;
        let guard = self.inner.locks.acquire(path.as_ref()).await?;
        self.write_locked(guard.path(), text.into_bytes(), document.clone(), create_backup)
            .await
    }

    /// Replace the file at `path` with `text` verbatim, keeping comments and
    /// formatting. The text must parse as a configuration document.
    pub async fn write_text(
        &self,
        path: impl AsRef<Path>,
        text: &str,
        create_backup: bool,
    ) -> StoreResult<()> {
        self.ensure_open()?;
        let document = ConfigDocument::parse_at(text, Some(path.as_ref()))?;
        let guard = self.inner.locks.acquire(path.as_ref()).await?;
        self.write_locked(guard.path(), text.as_bytes().to_vec(), document, create_backup)
            .await
    }

    /// Read, edit and write back the document at `path` in one critical
    /// section. A missing file starts out as an empty document.
    ///
    /// Returns the document as written.
    pub async fn update<F>(
        &self,
        path: impl AsRef<Path>,
        create_backup: bool,
        editor: F,
    ) -> StoreResult<ConfigDocument>
    where
        F: FnOnce(&mut ConfigDocument) + Send,
    {
        self.ensure_open()?;
        let guard = self.inner.locks.acquire(path.as_ref()).await?;
        let path = guard.path();

        let mut document = match self.load_locked(path, true).await {
            Ok(document) => document,
            Err(StoreError::NotFound(_)) => {
                debug!(path = %path.display(), "Config does not exist yet, starting empty");
                ConfigDocument::new()
            }
            Err(e) => return Err(e),
        };

        editor(&mut document);

        let text = document.to_yaml()?;
        self.write_locked(path, text.into_bytes(), document.clone(), create_backup)
            .await?;
        Ok(document)
    }

    /// Set one top-level section of the document at `path`, leaving every
    /// other section as it was. The previous file content is backed up.
    pub async fn update_section(
        &self,
        path: impl AsRef<Path>,
        key: &str,
        value: Value,
    ) -> StoreResult<ConfigDocument> {
        self.update(path, true, |document| {
            document.set(key, value);
        })
        .await
    }

    /// Backup snapshots of the file at `path`, newest first.
    pub async fn list_backups(&self, path: impl AsRef<Path>) -> StoreResult<Vec<BackupSnapshot>> {
        self.ensure_open()?;
        let guard = self.inner.locks.acquire(path.as_ref()).await?;
        let path = guard.path().to_path_buf();
        let rotator = self.rotator(&path);

        blocking(move || rotator.list(basename(&path)?)).await
    }

    /// Replace the file at `path` with the content of the named snapshot.
    ///
    /// The current content is not backed up first; call [`ConfigStore::write`]
    /// beforehand to keep it. An unknown snapshot fails with
    /// [`StoreError::NotFound`] and leaves the file untouched.
    pub async fn restore_backup(
        &self,
        path: impl AsRef<Path>,
        snapshot_name: &str,
    ) -> StoreResult<BackupSnapshot> {
        self.ensure_open()?;
        let guard = self.inner.locks.acquire(path.as_ref()).await?;
        let path = guard.path().to_path_buf();
        let rotator = self.rotator(&path);
        let name = snapshot_name.to_string();
        trace!(path = %path.display(), state = "Locked(Writing)", "Store transition");

        let target = path.clone();
        let (snapshot, bytes, fingerprint) = blocking(move || {
            let snapshot = rotator.find(basename(&target)?, &name)?;
            let bytes = rotator.read(&snapshot)?;
            write_atomic(&target, &bytes)?;
            let fingerprint = stat_written(&target, &bytes);
            Ok((snapshot, bytes, fingerprint))
        })
        .await?;
        trace!(path = %path.display(), state = "Renamed", "Store transition");

        let parsed = ConfigDocument::from_bytes(&bytes, Some(&path));
        if let Err(e) = &parsed {
            warn!(path = %path.display(), error = %e, "Restored snapshot does not parse");
        }
        match (parsed, fingerprint) {
            (Ok(document), Some(fingerprint)) => {
                self.inner
                    .cache
                    .put(&path, CacheEntry { document, fingerprint })
                    .await;
            }
            // Still the store's own content; the watcher must not report it.
            (Err(_), Some(fingerprint)) => self.inner.cache.put_unparsed(&path, fingerprint).await,
            (_, None) => {
                self.inner.cache.invalidate(&path).await;
            }
        }

        info!(path = %path.display(), snapshot = %snapshot.name, "Restored config from backup");
        trace!(path = %path.display(), state = "Idle", "Store transition");
        Ok(snapshot)
    }

    /// Call `callback` whenever the file at `path` is changed by anything
    /// other than this store.
    ///
    /// If file notifications are unavailable the returned subscription is not
    /// live; see [`WatchSubscription::is_live`].
    pub async fn watch<F>(&self, path: impl AsRef<Path>, callback: F) -> StoreResult<WatchSubscription>
    where
        F: Fn(WatchEvent) + Send + Sync + 'static,
    {
        self.ensure_open()?;
        let path = PathLocks::resolve(path.as_ref())?;
        let callback: WatchCallback = Arc::new(callback);
        Ok(self.inner.watchers.subscribe(path, callback))
    }

    /// Cancel a watch subscription. Same as dropping it.
    pub fn unwatch(&self, subscription: WatchSubscription) {
        debug!(subscription = %subscription.id(), "Unwatching config file");
        drop(subscription);
    }

    /// Check a document for structural problems.
    pub fn validate(&self, document: &ConfigDocument) -> ValidationReport {
        validate::validate(document)
    }

    /// Built-in configuration templates.
    pub fn templates(&self) -> &'static [ConfigTemplate] {
        templates::builtin()
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn rotator(&self, path: &Path) -> BackupRotator {
        BackupRotator::new(
            self.inner.config.backup_dir_for(path),
            self.inner.config.retention(),
        )
    }

    /// Load the document at `path`. The caller holds the path lock.
    async fn load_locked(&self, path: &Path, use_cache: bool) -> StoreResult<ConfigDocument> {
        if use_cache && self.inner.config.cache_enabled {
            if let Some(document) = self.inner.cache.get(path).await? {
                return Ok(document);
            }
        }

        let owned = path.to_path_buf();
        let (bytes, fingerprint) = blocking(move || {
            read_with_fingerprint(&owned).map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    StoreError::not_found(&owned)
                } else {
                    StoreError::Read {
                        path: owned.clone(),
                        source: e,
                    }
                }
            })
        })
        .await?;

        let document = ConfigDocument::from_bytes(&bytes, Some(path))?;
        self.inner
            .cache
            .put(
                path,
                CacheEntry {
                    document: document.clone(),
                    fingerprint,
                },
            )
            .await;
        debug!(path = %path.display(), size_bytes = bytes.len(), "Loaded config from disk");
        Ok(document)
    }

    /// Back up, write and cache. The caller holds the path lock.
    async fn write_locked(
        &self,
        path: &Path,
        bytes: Vec<u8>,
        document: ConfigDocument,
        create_backup: bool,
    ) -> StoreResult<()> {
        let op = Identifier::operation();
        let _timing = TimingGuard::new("store.write", path.display().to_string()).with_operation(&op);
        trace!(op = %op, path = %path.display(), state = "Locked(Writing)", "Store transition");

        let rotator = create_backup.then(|| self.rotator(path));
        let policy = self.inner.config.backup_policy;
        let target = path.to_path_buf();
        let op_id = op.clone();

        let fingerprint = blocking(move || {
            commit_write(&target, &bytes, rotator.as_ref(), policy, |temp| {
                trace!(op = %op_id, temp = %temp.display(), state = "TempWritten", "Store transition");
                Ok(())
            })
        })
        .await?;
        trace!(op = %op, state = "Renamed", "Store transition");

        match fingerprint {
            Some(fingerprint) => {
                self.inner
                    .cache
                    .put(path, CacheEntry { document, fingerprint })
                    .await;
            }
            None => {
                self.inner.cache.invalidate(path).await;
            }
        }
        trace!(op = %op, path = %path.display(), state = "CacheUpdated", "Store transition");

        info!(op = %op, path = %path.display(), backup = create_backup, "Wrote config");
        Ok(())
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("config", &self.inner.config)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

/// Snapshot, replace and prune, in that order.
///
/// If the replacement fails, the snapshot taken for it is deleted again so
/// the backup directory is as it was. Pruning runs after the rename and is
/// retried once; a second failure is logged and left for the next write,
/// since the new content is already committed.
fn commit_write<F>(
    target: &Path,
    bytes: &[u8],
    rotator: Option<&BackupRotator>,
    policy: BackupPolicy,
    before_rename: F,
) -> StoreResult<Option<FileFingerprint>>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let mut taken = None;
    if let Some(rotator) = rotator {
        match rotator.snapshot(target) {
            Ok(snapshot) => {
                trace!(
                    snapshot = ?snapshot.as_ref().map(|s| &s.name),
                    state = "BackupTaken",
                    "Store transition"
                );
                taken = snapshot;
            }
            Err(e) if policy == BackupPolicy::BestEffort => {
                warn!(path = %target.display(), error = %e, "Backup failed, writing anyway")
            }
            Err(e) => return Err(e),
        }
    }

    if let Err(e) = write_atomic_with(target, bytes, before_rename) {
        if let Some(snapshot) = taken {
            match fs::remove_file(&snapshot.path) {
                Ok(()) => debug!(snapshot = %snapshot.name, "Discarded backup of failed write"),
                Err(remove_err) => warn!(
                    snapshot = %snapshot.name,
                    error = %remove_err,
                    "Failed to discard backup of failed write"
                ),
            }
        }
        return Err(e);
    }

    if let (Some(rotator), Ok(name)) = (rotator, basename(target)) {
        if let Err(first) = rotator.rotate(name) {
            debug!(path = %target.display(), error = %first, "Pruning backups failed, retrying");
            if let Err(e) = rotator.rotate(name) {
                warn!(path = %target.display(), error = %e, "Failed to prune old backups");
            }
        }
    }

    Ok(stat_written(target, bytes))
}

/// Fingerprint of content just written to `path`, or `None` if the file
/// cannot be stat'ed (the cache entry is then dropped instead).
fn stat_written(path: &Path, bytes: &[u8]) -> Option<FileFingerprint> {
    match fs::metadata(path).and_then(|meta| FileFingerprint::new(bytes, &meta)) {
        Ok(fingerprint) => Some(fingerprint),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to stat written config");
            None
        }
    }
}

/// Run blocking filesystem work off the async workers.
async fn blocking<T, F>(f: F) -> StoreResult<T>
where
    F: FnOnce() -> StoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}
