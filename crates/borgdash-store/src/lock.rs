//! Per-path mutual exclusion.
//!
//! Every operation on a config path, reads included, holds that path's lock
//! for its whole duration. Waiters park on a fair (FIFO) async mutex, so a
//! steady stream of callers cannot starve an earlier one. Distinct paths have
//! distinct mutexes and never contend.

use crate::{StoreError, StoreResult};
use borgdash_util::TimingGuard;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{trace, warn};

/// Exclusive access to one config path. Dropping the guard releases it.
#[must_use = "the path is unlocked as soon as the guard is dropped"]
pub struct PathGuard {
    path: PathBuf,
    _guard: OwnedMutexGuard<()>,
    _timing: TimingGuard,
}

impl PathGuard {
    /// The normalized path this guard protects.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for PathGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathGuard").field("path", &self.path).finish()
    }
}

/// Registry of per-path locks owned by one store instance.
///
/// Entries are created on first use and kept for the lifetime of the
/// registry; the set of config paths a dashboard touches is small.
pub struct PathLocks {
    locks: RwLock<HashMap<PathBuf, Arc<Mutex<()>>>>,
    default_timeout: Duration,
}

impl PathLocks {
    /// Create an empty registry with the given default wait bound.
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Resolve `path` to the normalized absolute form used as the lock key.
    pub fn resolve(path: &Path) -> StoreResult<PathBuf> {
        let resolved = borgdash_util::path::absolute(path).ok_or_else(|| {
            StoreError::invalid_path(format!("cannot resolve '{}'", path.display()))
        })?;

        if resolved.file_name().is_none() {
            return Err(StoreError::invalid_path(format!(
                "'{}' does not name a file",
                path.display()
            )));
        }

        Ok(resolved)
    }

    /// Acquire the lock for `path`, waiting at most the default timeout.
    pub async fn acquire(&self, path: &Path) -> StoreResult<PathGuard> {
        self.acquire_with_timeout(path, self.default_timeout).await
    }

    /// Acquire the lock for `path`, waiting at most `timeout`.
    ///
    /// Dropping the returned future before it completes abandons the wait
    /// without affecting other waiters.
    pub async fn acquire_with_timeout(
        &self,
        path: &Path,
        timeout: Duration,
    ) -> StoreResult<PathGuard> {
        let path = Self::resolve(path)?;
        let mutex = self.entry(&path).await;

        trace!(path = %path.display(), "Waiting for path lock");
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                trace!(path = %path.display(), "Acquired path lock");
                Ok(PathGuard {
                    _timing: TimingGuard::lock(path.display().to_string()),
                    path,
                    _guard: guard,
                })
            }
            Err(_) => {
                warn!(path = %path.display(), ?timeout, "Timed out waiting for path lock");
                Err(StoreError::LockTimeout {
                    path,
                    waited: timeout,
                })
            }
        }
    }

    /// Number of paths that have been locked at least once.
    pub async fn tracked_paths(&self) -> usize {
        self.locks.read().await.len()
    }

    async fn entry(&self, path: &Path) -> Arc<Mutex<()>> {
        {
            let locks = self.locks.read().await;
            if let Some(mutex) = locks.get(path) {
                return Arc::clone(mutex);
            }
        }

        let mut locks = self.locks.write().await;
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_same_path_is_exclusive() {
        let locks = Arc::new(PathLocks::new(Duration::from_secs(5)));
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(Path::new("/cfg/a.yaml")).await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_paths_do_not_block() {
        let locks = PathLocks::new(Duration::from_millis(50));
        let _a = locks.acquire(Path::new("/cfg/a.yaml")).await.unwrap();
        let b = locks.acquire(Path::new("/cfg/b.yaml")).await;
        assert!(b.is_ok());
        assert_eq!(locks.tracked_paths().await, 2);
    }

    #[tokio::test]
    async fn test_equivalent_spellings_share_a_lock() {
        let locks = PathLocks::new(Duration::from_millis(20));
        let _guard = locks.acquire(Path::new("/cfg/a.yaml")).await.unwrap();
        let result = locks.acquire(Path::new("/cfg/./x/../a.yaml")).await;
        assert!(matches!(result, Err(StoreError::LockTimeout { .. })));
    }

    #[tokio::test]
    async fn test_timeout_then_release() {
        let locks = PathLocks::new(Duration::from_secs(5));
        let guard = locks.acquire(Path::new("/cfg/a.yaml")).await.unwrap();

        let result = locks
            .acquire_with_timeout(Path::new("/cfg/a.yaml"), Duration::from_millis(20))
            .await;
        match result {
            Err(StoreError::LockTimeout { path, waited }) => {
                assert_eq!(path, PathBuf::from("/cfg/a.yaml"));
                assert_eq!(waited, Duration::from_millis(20));
            }
            other => panic!("expected timeout, got {other:?}"),
        }

        drop(guard);
        // The timed-out waiter left no trace behind.
        let again = locks
            .acquire_with_timeout(Path::new("/cfg/a.yaml"), Duration::from_millis(20))
            .await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_cancelled_waiter_does_not_wedge_lock() {
        let locks = Arc::new(PathLocks::new(Duration::from_secs(5)));
        let guard = locks.acquire(Path::new("/cfg/a.yaml")).await.unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move { locks.acquire(Path::new("/cfg/a.yaml")).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        drop(guard);
        let next = locks
            .acquire_with_timeout(Path::new("/cfg/a.yaml"), Duration::from_millis(50))
            .await;
        assert!(next.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_path_fails_fast() {
        let locks = PathLocks::new(Duration::from_secs(5));
        assert!(matches!(
            locks.acquire(Path::new("")).await,
            Err(StoreError::InvalidPath(_))
        ));
        assert!(matches!(
            locks.acquire(Path::new("/")).await,
            Err(StoreError::InvalidPath(_))
        ));
        assert_eq!(locks.tracked_paths().await, 0);
    }
}
