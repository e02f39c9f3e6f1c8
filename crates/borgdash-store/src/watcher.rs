//! Live reload of config files changed outside the store.
//!
//! One `notify` watcher per config path observes the file's parent directory,
//! so editors and tools that replace the file by rename are seen as well as
//! in-place writes. Raw events are debounced on a tokio task. After the quiet
//! period the task takes the path lock like any other operation, compares the
//! file's content hash with the cached one (equal means the store wrote it
//! itself), then reparses, refreshes the cache and notifies subscribers.

use crate::cache::{read_with_fingerprint, CacheEntry, DocumentCache};
use crate::lock::PathLocks;
use crate::{ConfigDocument, StoreError};
use borgdash_util::Identifier;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Capacity of the raw event channel. Overflow is harmless; one pending
/// event is enough to trigger a reload.
const RAW_EVENT_CAPACITY: usize = 64;

/// What a subscriber is told after an external change.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// The file was changed and parsed successfully.
    Changed(ConfigDocument),
    /// The file was removed, could not be read, or failed to parse.
    Error(Arc<StoreError>),
}

/// Subscriber callback. Runs on the watcher task; keep it short.
pub type WatchCallback = Arc<dyn Fn(WatchEvent) + Send + Sync>;

/// Handle for a live watch. Dropping it unsubscribes.
#[must_use = "the watch is cancelled as soon as the subscription is dropped"]
pub struct WatchSubscription {
    id: String,
    path: PathBuf,
    live: bool,
    registry: Weak<WatchShared>,
}

impl WatchSubscription {
    /// Unique subscription id (`wsub_...`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The watched config path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether filesystem notifications are actually delivered. `false` when
    /// the watcher could not be set up on this platform or path.
    pub fn is_live(&self) -> bool {
        self.live
    }
}

impl std::fmt::Debug for WatchSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchSubscription")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("live", &self.live)
            .finish()
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.registry.upgrade() {
            shared.unsubscribe(&self.path, &self.id);
        }
    }
}

/// Watchers owned by one store instance.
pub(crate) struct Watchers {
    shared: Arc<WatchShared>,
}

struct WatchShared {
    paths: Mutex<HashMap<PathBuf, PathWatch>>,
    locks: Arc<PathLocks>,
    cache: Arc<DocumentCache>,
    debounce: Duration,
    setup_failure_logged: AtomicBool,
}

struct PathWatch {
    subscribers: Vec<(String, WatchCallback)>,
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Watchers {
    pub(crate) fn new(locks: Arc<PathLocks>, cache: Arc<DocumentCache>, debounce: Duration) -> Self {
        Self {
            shared: Arc::new(WatchShared {
                paths: Mutex::new(HashMap::new()),
                locks,
                cache,
                debounce,
                setup_failure_logged: AtomicBool::new(false),
            }),
        }
    }

    /// Register `callback` for external changes to the resolved `path`.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn subscribe(&self, path: PathBuf, callback: WatchCallback) -> WatchSubscription {
        let id = Identifier::subscription();
        let mut paths = self.shared.lock_paths();

        if let Some(watch) = paths.get_mut(&path) {
            watch.subscribers.push((id.clone(), callback));
            debug!(path = %path.display(), subscription = %id, "Added watch subscriber");
            return self.subscription(id, path, true);
        }

        match self.start(&path) {
            Ok((watcher, task)) => {
                paths.insert(
                    path.clone(),
                    PathWatch {
                        subscribers: vec![(id.clone(), callback)],
                        _watcher: watcher,
                        task,
                    },
                );
                info!(path = %path.display(), subscription = %id, "Watching config file");
                self.subscription(id, path, true)
            }
            Err(e) => {
                if !self.shared.setup_failure_logged.swap(true, Ordering::SeqCst) {
                    warn!(error = %e, "File watching unavailable, live updates disabled");
                } else {
                    debug!(error = %e, "File watching unavailable");
                }
                self.subscription(id, path, false)
            }
        }
    }

    /// Number of paths with an active watcher.
    pub(crate) fn watched_paths(&self) -> usize {
        self.shared.lock_paths().len()
    }

    /// Stop every watcher. Outstanding subscriptions become inert.
    pub(crate) fn shutdown(&self) {
        let drained: Vec<(PathBuf, PathWatch)> = self.shared.lock_paths().drain().collect();
        for (path, watch) in drained {
            watch.task.abort();
            debug!(path = %path.display(), "Stopped config watcher");
        }
    }

    fn subscription(&self, id: String, path: PathBuf, live: bool) -> WatchSubscription {
        WatchSubscription {
            id,
            path,
            live,
            registry: if live {
                Arc::downgrade(&self.shared)
            } else {
                Weak::new()
            },
        }
    }

    fn start(&self, path: &Path) -> Result<(RecommendedWatcher, JoinHandle<()>), StoreError> {
        let setup_err = |source| StoreError::WatchSetup {
            path: path.to_path_buf(),
            source,
        };
        let (dir, file_name) = match (path.parent(), path.file_name()) {
            (Some(dir), Some(name)) => (dir.to_path_buf(), name.to_os_string()),
            _ => {
                return Err(StoreError::invalid_path(format!(
                    "{} has no parent directory",
                    path.display()
                )))
            }
        };

        let (raw_tx, raw_rx) = mpsc::channel(RAW_EVENT_CAPACITY);
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) if is_config_event(&event, &file_name) => {
                    let _ = raw_tx.try_send(());
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "File watcher error"),
            },
            notify::Config::default(),
        )
        .map_err(setup_err)?;

        // The parent directory, so delete-and-recreate is seen too.
        watcher
            .watch(&dir, RecursiveMode::NonRecursive)
            .map_err(setup_err)?;

        let task = tokio::spawn(debounce_loop(
            raw_rx,
            Arc::downgrade(&self.shared),
            path.to_path_buf(),
            self.shared.debounce,
        ));

        Ok((watcher, task))
    }
}

impl Drop for Watchers {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl WatchShared {
    fn lock_paths(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, PathWatch>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsubscribe(&self, path: &Path, id: &str) {
        let stopped = {
            let mut paths = self.lock_paths();
            let Some(watch) = paths.get_mut(path) else {
                return;
            };
            watch.subscribers.retain(|(sub_id, _)| sub_id != id);
            debug!(path = %path.display(), subscription = %id, "Removed watch subscriber");

            if watch.subscribers.is_empty() {
                paths.remove(path)
            } else {
                None
            }
        };

        if let Some(watch) = stopped {
            watch.task.abort();
            info!(path = %path.display(), "Stopped watching config file");
        }
    }

    fn callbacks(&self, path: &Path) -> Vec<WatchCallback> {
        self.lock_paths()
            .get(path)
            .map(|watch| watch.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    /// Reload `path` after an external change and notify subscribers.
    async fn reload(&self, path: &Path) {
        let event = match self.locks.acquire(path).await {
            Ok(guard) => {
                let event = self.reload_locked(path).await;
                drop(guard);
                event
            }
            Err(e) => Some(WatchEvent::Error(Arc::new(e))),
        };

        let Some(event) = event else {
            return;
        };

        let callbacks = self.callbacks(path);
        trace!(path = %path.display(), subscribers = callbacks.len(), "Dispatching watch event");
        for callback in callbacks {
            callback(event.clone());
        }
    }

    /// Reload with the path lock held. `None` when nothing changed.
    async fn reload_locked(&self, path: &Path) -> Option<WatchEvent> {
        let owned = path.to_path_buf();
        let loaded = match tokio::task::spawn_blocking(move || read_with_fingerprint(&owned)).await
        {
            Ok(loaded) => loaded,
            Err(e) => return Some(WatchEvent::Error(Arc::new(e.into()))),
        };

        let (bytes, fingerprint) = match loaded {
            Ok(loaded) => loaded,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.cache.invalidate(path).await;
                info!(path = %path.display(), "Config file removed externally");
                return Some(WatchEvent::Error(Arc::new(StoreError::not_found(path))));
            }
            Err(source) => {
                self.cache.invalidate(path).await;
                return Some(WatchEvent::Error(Arc::new(StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                })));
            }
        };

        if let Some(cached) = self.cache.fingerprint(path).await {
            if cached.content_hash == fingerprint.content_hash {
                trace!(path = %path.display(), "Content unchanged, skipping reload");
                return None;
            }
        }

        self.cache.invalidate(path).await;
        match ConfigDocument::from_bytes(&bytes, Some(path)) {
            Ok(document) => {
                self.cache
                    .put(
                        path,
                        CacheEntry {
                            document: document.clone(),
                            fingerprint,
                        },
                    )
                    .await;
                info!(path = %path.display(), "Reloaded externally modified config");
                Some(WatchEvent::Changed(document))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Externally modified config is invalid");
                Some(WatchEvent::Error(Arc::new(e)))
            }
        }
    }
}

/// Wait for a quiet period after the last raw event, then reload.
///
/// Ends when the notify watcher (the only sender) is dropped or the owning
/// store is gone.
async fn debounce_loop(
    mut rx: mpsc::Receiver<()>,
    shared: Weak<WatchShared>,
    path: PathBuf,
    debounce: Duration,
) {
    while rx.recv().await.is_some() {
        loop {
            match tokio::time::timeout(debounce, rx.recv()).await {
                Ok(Some(())) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        let Some(shared) = shared.upgrade() else {
            return;
        };
        shared.reload(&path).await;
    }
    trace!(path = %path.display(), "Watcher event stream closed");
}

/// Whether a notify event touches the config file itself.
fn is_config_event(event: &Event, file_name: &OsString) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_)
    );

    relevant
        && event
            .paths
            .iter()
            .any(|p| p.file_name().is_some_and(|name| name == file_name))
}
