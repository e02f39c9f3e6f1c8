//! Store integration tests.
//!
//! End-to-end behavior of `ConfigStore` against a real filesystem: locking
//! under concurrency, backups, restore, cache staleness and live reload.

use borgdash_store::{
    BackupPolicy, CacheValidation, ConfigDocument, ConfigStore, StoreConfig, StoreError,
    WatchEvent, DEFAULT_BACKUP_DIR_NAME,
};
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

fn doc(text: &str) -> ConfigDocument {
    ConfigDocument::parse(text).expect("test document should parse")
}

fn yaml(text: &str) -> Value {
    serde_yaml::from_str(text).expect("test value should parse")
}

fn setup() -> (TempDir, PathBuf, ConfigStore) {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let path = temp.path().join("config.yaml");
    let store = ConfigStore::open(
        StoreConfig::default()
            .with_lock_timeout(Duration::from_secs(10))
            .with_watch_debounce(Duration::from_millis(50)),
    );
    (temp, path, store)
}

fn backup_files(config: &Path) -> Vec<String> {
    let dir = config.parent().unwrap().join(DEFAULT_BACKUP_DIR_NAME);
    let mut names: Vec<String> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

/// Write then read returns the same document.
#[tokio::test]
async fn test_read_after_write() {
    let (_temp, path, store) = setup();
    let written = doc("retention:\n  keep_daily: 7\n");

    store.write(&path, &written, true).await.unwrap();

    assert_eq!(store.read(&path, true).await.unwrap(), written);
    assert_eq!(store.read(&path, false).await.unwrap(), written);
    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "retention:\n  keep_daily: 7\n"
    );
}

/// Key order survives a write/read round trip.
#[tokio::test]
async fn test_round_trip_keeps_key_order() {
    let (_temp, path, store) = setup();
    let written = doc(
        "storage:\n  compression: lz4\nrepositories:\n- path: /backups/main\nretention:\n  keep_daily: 7\n",
    );

    store.write(&path, &written, false).await.unwrap();
    let read = store.read(&path, false).await.unwrap();

    assert_eq!(
        read.keys().collect::<Vec<_>>(),
        vec!["storage", "repositories", "retention"]
    );
    assert_eq!(read, written);
}

/// Four writes with backups leave exactly the three newest snapshots.
#[tokio::test]
async fn test_four_writes_keep_three_backups() {
    let (_temp, path, store) = setup();

    for i in 0..4 {
        let content = doc(&format!("retention:\n  keep_daily: {}\n", i + 1));
        store.write(&path, &content, true).await.unwrap();
    }

    // The first write had nothing to back up; writes 2-4 snapshotted
    // versions 1-3.
    let backups = store.list_backups(&path).await.unwrap();
    assert_eq!(backups.len(), 3);
    assert_eq!(backup_files(&path).len(), 3);

    let mut contents = Vec::new();
    for snapshot in &backups {
        contents.push(fs::read_to_string(&snapshot.path).unwrap());
    }
    assert_eq!(
        contents,
        vec![
            "retention:\n  keep_daily: 3\n",
            "retention:\n  keep_daily: 2\n",
            "retention:\n  keep_daily: 1\n",
        ]
    );

    // One more write pushes out the oldest.
    store
        .write(&path, &doc("retention:\n  keep_daily: 5\n"), true)
        .await
        .unwrap();
    let backups = store.list_backups(&path).await.unwrap();
    assert_eq!(backups.len(), 3);
    assert_eq!(
        fs::read_to_string(&backups[0].path).unwrap(),
        "retention:\n  keep_daily: 4\n"
    );
    assert!(backups
        .windows(2)
        .all(|pair| pair[0].created_at > pair[1].created_at));
}

/// Concurrent writers never interleave; the file holds one complete document.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_do_not_mix() {
    let (_temp, path, store) = setup();

    let a = doc("repositories:\n- path: /backups/a\nretention:\n  keep_daily: 1\n");
    let b = doc("repositories:\n- path: /backups/b\nretention:\n  keep_weekly: 2\n");

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        let path = path.clone();
        let document = if i % 2 == 0 { a.clone() } else { b.clone() };
        handles.push(tokio::spawn(async move {
            store.write(&path, &document, true).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let on_disk = doc(&fs::read_to_string(&path).unwrap());
    assert!(on_disk == a || on_disk == b, "mixed document: {on_disk:?}");
    assert_eq!(store.read(&path, false).await.unwrap(), on_disk);
    assert_eq!(store.list_backups(&path).await.unwrap().len(), 3);
}

/// Concurrent section updates are all applied; none is lost.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_are_not_lost() {
    let (_temp, path, store) = setup();
    store
        .write(&path, &doc("repositories:\n- path: /backups/main\n"), false)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let store = store.clone();
        let path = path.clone();
        handles.push(tokio::spawn(async move {
            store
                .update_section(&path, &format!("hook_{i}"), Value::from(i))
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let result = store.read(&path, false).await.unwrap();
    assert_eq!(result.len(), 11);
    for i in 0..10 {
        assert_eq!(result.get(&format!("hook_{i}")), Some(&Value::from(i)));
    }
}

/// Restoring a snapshot brings back its exact content.
#[tokio::test]
async fn test_restore_backup() {
    let (_temp, path, store) = setup();
    let original = doc("retention:\n  keep_daily: 7\n");
    store.write(&path, &original, true).await.unwrap();
    store
        .write(&path, &doc("retention:\n  keep_daily: 1\n"), true)
        .await
        .unwrap();

    let backups = store.list_backups(&path).await.unwrap();
    assert_eq!(backups.len(), 1);

    let restored = store.restore_backup(&path, &backups[0].name).await.unwrap();
    assert_eq!(restored.name, backups[0].name);
    assert_eq!(store.read(&path, true).await.unwrap(), original);
    assert_eq!(store.read(&path, false).await.unwrap(), original);

    // Restore does not take a snapshot of its own.
    assert_eq!(store.list_backups(&path).await.unwrap().len(), 1);
}

/// An unknown snapshot name fails and leaves the file untouched.
#[tokio::test]
async fn test_restore_nonexistent_snapshot() {
    let (_temp, path, store) = setup();
    store
        .write(&path, &doc("retention:\n  keep_daily: 7\n"), true)
        .await
        .unwrap();
    let before = fs::read(&path).unwrap();

    for name in ["nonexistent.snapshot", "../config.yaml", ""] {
        let result = store.restore_backup(&path, name).await;
        assert!(
            matches!(result, Err(StoreError::NotFound(_))),
            "{name:?} gave {result:?}"
        );
    }
    assert_eq!(fs::read(&path).unwrap(), before);
}

/// Updating one section leaves the others intact.
#[tokio::test]
async fn test_update_section_keeps_other_sections() {
    let (_temp, path, store) = setup();
    store
        .write(
            &path,
            &doc("retention:\n  keep_daily: 7\nstorage:\n  compression: lz4\n"),
            false,
        )
        .await
        .unwrap();

    let updated = store
        .update_section(&path, "storage", yaml("compression: zstd"))
        .await
        .unwrap();

    let read = store.read(&path, true).await.unwrap();
    assert_eq!(read, updated);
    assert_eq!(
        store.get_section(&path, "storage").await.unwrap(),
        Some(yaml("compression: zstd"))
    );
    assert_eq!(read.get("retention"), Some(&yaml("keep_daily: 7")));
    assert_eq!(read.keys().collect::<Vec<_>>(), vec!["retention", "storage"]);

    // The pre-update content was backed up.
    let backups = store.list_backups(&path).await.unwrap();
    assert_eq!(backups.len(), 1);
    assert!(fs::read_to_string(&backups[0].path)
        .unwrap()
        .contains("compression: lz4"));
}

/// An edit made behind the store's back is seen by the next cached read.
#[tokio::test]
async fn test_external_modification_invalidates_cache() {
    let (_temp, path, store) = setup();
    store
        .write(&path, &doc("retention:\n  keep_daily: 7\n"), false)
        .await
        .unwrap();
    assert_eq!(
        store.read(&path, true).await.unwrap(),
        doc("retention:\n  keep_daily: 7\n")
    );

    // Different size, so even a coarse mtime cannot hide the edit.
    fs::write(&path, "retention:\n  keep_daily: 14\n").unwrap();

    assert_eq!(
        store.read(&path, true).await.unwrap(),
        doc("retention:\n  keep_daily: 14\n")
    );
}

/// Content hashing catches an external edit that keeps size and mtime.
#[tokio::test]
async fn test_content_hash_validation() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.yaml");
    let store = ConfigStore::open(
        StoreConfig::default().with_cache_validation(CacheValidation::ContentHash),
    );

    store
        .write(&path, &doc("retention:\n  keep_daily: 7\n"), false)
        .await
        .unwrap();
    let mtime = fs::metadata(&path).unwrap().modified().unwrap();

    fs::write(&path, "retention:\n  keep_daily: 8\n").unwrap();
    fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(mtime)
        .unwrap();

    assert_eq!(
        store.read(&path, true).await.unwrap(),
        doc("retention:\n  keep_daily: 8\n")
    );
}

/// A second caller gives up with a timeout while the path is held.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lock_timeout() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.yaml");
    let store = ConfigStore::open(StoreConfig::default().with_lock_timeout(Duration::from_millis(100)));
    store.write(&path, &doc("a: 1\n"), false).await.unwrap();

    let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
    let holder = {
        let store = store.clone();
        let path = path.clone();
        tokio::spawn(async move {
            store
                .update(&path, false, move |document| {
                    document.set("b", Value::from(2));
                    let _ = entered_tx.send(());
                    // Keep the lock well past the other caller's timeout.
                    std::thread::sleep(Duration::from_millis(600));
                })
                .await
        })
    };

    entered_rx.await.unwrap();
    match store.read(&path, true).await {
        Err(e @ StoreError::LockTimeout { .. }) => assert!(e.is_retryable()),
        other => panic!("expected LockTimeout, got {other:?}"),
    }

    holder.await.unwrap().unwrap();
    assert_eq!(store.read(&path, true).await.unwrap(), doc("a: 1\nb: 2\n"));
}

/// Separate stores have separate locks and caches.
#[tokio::test]
async fn test_independent_store_instances() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.yaml");
    let first = ConfigStore::open(StoreConfig::default());
    let second = ConfigStore::open(StoreConfig::default());

    first.write(&path, &doc("a: 1\n"), false).await.unwrap();
    assert_eq!(second.read(&path, true).await.unwrap(), doc("a: 1\n"));

    first.close().await;
    assert!(matches!(first.read(&path, true).await, Err(StoreError::Closed)));
    assert_eq!(second.read(&path, true).await.unwrap(), doc("a: 1\n"));
}

/// Distinct paths are fully independent.
#[tokio::test]
async fn test_distinct_paths_keep_separate_backups() {
    let (temp, path, store) = setup();
    let other = temp.path().join("other.yaml");

    for i in 0..3 {
        store
            .write(&path, &doc(&format!("a: {i}\n")), true)
            .await
            .unwrap();
        store
            .write(&other, &doc(&format!("b: {i}\n")), true)
            .await
            .unwrap();
    }

    assert_eq!(store.list_backups(&path).await.unwrap().len(), 2);
    assert_eq!(store.list_backups(&other).await.unwrap().len(), 2);
    assert!(store
        .list_backups(&other)
        .await
        .unwrap()
        .iter()
        .all(|s| s.name.starts_with("other.yaml.")));
}

/// A configured backup directory is used instead of the sibling default.
#[tokio::test]
async fn test_custom_backup_dir() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.yaml");
    let backups = temp.path().join("snapshots");
    let store = ConfigStore::open(
        StoreConfig::default()
            .with_backup_dir(&backups)
            .with_backup_policy(BackupPolicy::Required),
    );

    store.write(&path, &doc("a: 1\n"), true).await.unwrap();
    store.write(&path, &doc("a: 2\n"), true).await.unwrap();

    assert!(backup_files(&path).is_empty());
    assert_eq!(fs::read_dir(&backups).unwrap().count(), 1);
}

/// External edits reach watch subscribers; the store's own writes do not.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watch_reports_external_changes_only() {
    let (_temp, path, store) = setup();
    store
        .write(&path, &doc("retention:\n  keep_daily: 7\n"), false)
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = store
        .watch(&path, move |event| {
            let _ = tx.send(event);
        })
        .await
        .unwrap();
    if !subscription.is_live() {
        // No filesystem notifications on this platform.
        return;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Own write: no event.
    store
        .write(&path, &doc("retention:\n  keep_daily: 8\n"), true)
        .await
        .unwrap();
    let own = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(own.is_err(), "own write was reported: {own:?}");

    // External edit: reported with the new content, and the cache follows.
    fs::write(&path, "retention:\n  keep_daily: 30\n").unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event for external edit")
        .unwrap();
    match event {
        WatchEvent::Changed(document) => {
            assert_eq!(document, doc("retention:\n  keep_daily: 30\n"))
        }
        WatchEvent::Error(e) => panic!("unexpected error: {e}"),
    }
    assert_eq!(
        store.read(&path, true).await.unwrap(),
        doc("retention:\n  keep_daily: 30\n")
    );

    // Broken external edit: reported as an error, watcher keeps going.
    fs::write(&path, "retention: [unclosed\n").unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event for broken edit")
        .unwrap();
    assert!(matches!(
        event,
        WatchEvent::Error(ref e) if matches!(**e, StoreError::Serialization { .. })
    ));

    fs::write(&path, "retention:\n  keep_daily: 31\n").unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("watcher stopped after a parse error")
        .unwrap();
    assert!(matches!(event, WatchEvent::Changed(_)));

    store.unwatch(subscription);
}

/// Restoring a snapshot that does not parse is still the store's own change.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watch_ignores_restore_of_unparseable_snapshot() {
    let (_temp, path, store) = setup();
    fs::write(&path, "retention: [unclosed\n").unwrap();
    store
        .write(&path, &doc("retention:\n  keep_daily: 7\n"), true)
        .await
        .unwrap();
    let broken = store.list_backups(&path).await.unwrap().remove(0);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = store
        .watch(&path, move |event| {
            let _ = tx.send(event);
        })
        .await
        .unwrap();
    if !subscription.is_live() {
        return;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    store.restore_backup(&path, &broken.name).await.unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "retention: [unclosed\n");
    let own = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(own.is_err(), "restore was reported: {own:?}");

    // External edits after the restore are still reported.
    fs::write(&path, "retention:\n  keep_daily: 9\n").unwrap();
    let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event for external edit")
        .unwrap();
    assert!(matches!(event, WatchEvent::Changed(_)));

    store.unwatch(subscription);
}

/// Subscribers on one path share a watcher; both are notified.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watch_multiple_subscribers() {
    let (_temp, path, store) = setup();
    fs::write(&path, "a: 1\n").unwrap();

    let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut subscriptions = Vec::new();
    for _ in 0..2 {
        let count = Arc::clone(&count);
        let tx = tx.clone();
        subscriptions.push(
            store
                .watch(&path, move |_| {
                    count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    let _ = tx.send(());
                })
                .await
                .unwrap(),
        );
    }
    if !subscriptions.iter().all(|s| s.is_live()) {
        return;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    fs::write(&path, "a: 2\n").unwrap();
    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("subscriber not notified")
            .unwrap();
    }
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 2);
}

/// Invalid paths are rejected before anything touches the disk.
#[tokio::test]
async fn test_invalid_path() {
    let (_temp, _path, store) = setup();
    assert!(matches!(
        store.read("", true).await,
        Err(StoreError::InvalidPath(_))
    ));
    assert!(matches!(
        store.write("/", &doc("a: 1\n"), true).await,
        Err(StoreError::InvalidPath(_))
    ));
    assert!(matches!(
        store.watch("", |_| {}).await,
        Err(StoreError::InvalidPath(_))
    ));
}
