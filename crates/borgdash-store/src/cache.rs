//! Parsed-document cache with on-disk staleness checks.
//!
//! Each entry remembers the modification time, size and SHA-256 of the bytes
//! it was parsed from. An entry is only served while the file on disk is not
//! newer than that; callers hold the path lock while asking, so a write cannot
//! land between the check and the use.

use crate::config::CacheValidation;
use crate::{ConfigDocument, StoreError, StoreResult};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::{File, Metadata};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Identity of one version of a file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFingerprint {
    /// Modification time observed when the content was read.
    pub observed_at: SystemTime,
    /// Length of the content in bytes.
    pub size_bytes: u64,
    /// SHA-256 of the content.
    pub content_hash: [u8; 32],
}

impl FileFingerprint {
    /// Fingerprint `bytes` read from a file with metadata `meta`.
    pub fn new(bytes: &[u8], meta: &Metadata) -> io::Result<Self> {
        Ok(Self {
            observed_at: meta.modified()?,
            size_bytes: bytes.len() as u64,
            content_hash: hash(bytes),
        })
    }

    /// Whether the file described by `meta` may still hold this content.
    fn is_current(&self, meta: &Metadata) -> io::Result<bool> {
        Ok(meta.modified()? <= self.observed_at && meta.len() == self.size_bytes)
    }
}

/// SHA-256 of `bytes`.
pub fn hash(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Read the whole file at `path` and fingerprint what was read.
///
/// Metadata is taken before the content, so a concurrent external edit makes
/// the fingerprint look older than the file rather than newer.
pub(crate) fn read_with_fingerprint(path: &Path) -> io::Result<(Vec<u8>, FileFingerprint)> {
    let mut file = File::open(path)?;
    let meta = file.metadata()?;
    let mut bytes = Vec::with_capacity(meta.len() as usize);
    file.read_to_end(&mut bytes)?;
    let fingerprint = FileFingerprint::new(&bytes, &meta)?;
    Ok((bytes, fingerprint))
}

/// A cached document and the file version it came from.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub document: ConfigDocument,
    pub fingerprint: FileFingerprint,
}

/// Last parsed document per config path.
///
/// Content the store wrote itself but which does not parse (a restored
/// snapshot, for example) has no document. Only its fingerprint is kept, so
/// the watcher can still recognise the change as the store's own.
pub struct DocumentCache {
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
    unparsed: RwLock<HashMap<PathBuf, FileFingerprint>>,
    validation: CacheValidation,
}

impl DocumentCache {
    /// Create an empty cache.
    pub fn new(validation: CacheValidation) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            unparsed: RwLock::new(HashMap::new()),
            validation,
        }
    }

    /// Return the cached document for `path` if it is still current.
    ///
    /// Stale entries are dropped. A missing file is a miss, not an error.
    pub async fn get(&self, path: &Path) -> StoreResult<Option<ConfigDocument>> {
        let fingerprint = match self.entries.read().await.get(path) {
            Some(entry) => entry.fingerprint,
            None => {
                trace!(path = %path.display(), "Cache miss");
                return Ok(None);
            }
        };

        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.invalidate(path).await;
                return Ok(None);
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let read_err = |source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        };

        let mut current = fingerprint.is_current(&meta).map_err(read_err)?;
        if current && self.validation == CacheValidation::ContentHash {
            let bytes = tokio::fs::read(path).await.map_err(read_err)?;
            current = hash(&bytes) == fingerprint.content_hash;
        }

        if !current {
            debug!(path = %path.display(), "Cached document is stale");
            self.invalidate(path).await;
            return Ok(None);
        }

        trace!(path = %path.display(), "Cache hit");
        Ok(self
            .entries
            .read()
            .await
            .get(path)
            .map(|entry| entry.document.clone()))
    }

    /// Store `entry` for `path`, replacing any previous entry.
    pub async fn put(&self, path: &Path, entry: CacheEntry) {
        self.unparsed.write().await.remove(path);
        self.entries.write().await.insert(path.to_path_buf(), entry);
    }

    /// Record content written to `path` that has no parsed document. Any
    /// cached document for `path` is dropped.
    pub async fn put_unparsed(&self, path: &Path, fingerprint: FileFingerprint) {
        self.entries.write().await.remove(path);
        self.unparsed
            .write()
            .await
            .insert(path.to_path_buf(), fingerprint);
    }

    /// Fingerprint of the last known content of `path`, parsed or not,
    /// without a staleness check.
    pub async fn fingerprint(&self, path: &Path) -> Option<FileFingerprint> {
        if let Some(entry) = self.entries.read().await.get(path) {
            return Some(entry.fingerprint);
        }
        self.unparsed.read().await.get(path).copied()
    }

    /// Forget `path`. Returns whether a document was cached.
    pub async fn invalidate(&self, path: &Path) -> bool {
        self.unparsed.write().await.remove(path);
        self.entries.write().await.remove(path).is_some()
    }

    /// Drop all entries.
    pub async fn clear(&self) {
        self.unparsed.write().await.clear();
        self.entries.write().await.clear();
    }

    /// Number of cached documents.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
