//! Durable queue of upload sessions
//!
//! The whole queue lives in one JSON file. Every mutation clones the in-memory
//! snapshot, applies the change, writes the clone to a temporary file, renames
//! it over the queue file and only then commits it in memory. All of that
//! happens under one async mutex, so callers queue up instead of racing and a
//! failed write leaves both the file and memory at the previous state.
//!
//! A store owns its file for as long as it lives: the first access takes an
//! exclusive OS lock on a sibling `.lock` file, and a second store over the
//! same path (in this process or another) fails with [`QueueError::Locked`]
//! instead of overwriting sessions it never saw.

use crate::error::{QueueError, QueueResult};
use crate::models::{AssetState, QueueSnapshot, UploadSession};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// File name of the queue inside the app data directory
pub const QUEUE_FILE_NAME: &str = "upload_queue.json";

#[derive(Debug)]
struct Owned {
    snapshot: QueueSnapshot,
    /// Held open for the lifetime of the store; closing releases the lock
    _lock: File,
}

#[derive(Debug)]
pub struct QueueStore {
    path: PathBuf,
    /// `None` until the file has been locked and read once
    state: Mutex<Option<Owned>>,
}

impl QueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(None),
        }
    }

    /// Store backed by [`QUEUE_FILE_NAME`] inside `dir`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(QUEUE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the queue file at `path` without taking ownership of it
    ///
    /// For inspection only; the result may be stale as soon as it returns.
    pub async fn read_unlocked(path: &Path) -> QueueResult<QueueSnapshot> {
        read_snapshot(path).await
    }

    /// Current snapshot; reads the file on first access
    pub async fn load(&self) -> QueueResult<QueueSnapshot> {
        let mut guard = self.state.lock().await;
        let snapshot = loaded(&mut guard, &self.path).await?;
        Ok(snapshot.clone())
    }

    pub async fn list_sessions(&self) -> QueueResult<Vec<UploadSession>> {
        Ok(self.load().await?.sessions)
    }

    pub async fn get_session(&self, session_id: &str) -> QueueResult<Option<UploadSession>> {
        let mut guard = self.state.lock().await;
        let snapshot = loaded(&mut guard, &self.path).await?;
        Ok(snapshot.session(session_id).cloned())
    }

    /// Number of assets not yet uploaded, across all sessions
    pub async fn count_pending_assets(&self) -> QueueResult<usize> {
        let mut guard = self.state.lock().await;
        let snapshot = loaded(&mut guard, &self.path).await?;
        Ok(snapshot
            .sessions
            .iter()
            .flat_map(|s| s.assets.iter())
            .filter(|a| a.state != AssetState::Uploaded)
            .count())
    }

    /// Append a new session; its id must not be queued yet
    pub async fn add_session(&self, session: UploadSession) -> QueueResult<()> {
        check_assets(&session)?;
        self.mutate(move |snapshot| {
            if snapshot.position(&session.id).is_some() {
                return Err(QueueError::DuplicateSession(session.id));
            }
            log::info!(
                "Queued session {} with {} assets",
                session.id,
                session.assets.len()
            );
            snapshot.sessions.push(session);
            Ok(())
        })
        .await
    }

    /// Replace the session with the same id, or append it
    pub async fn upsert_session(&self, session: UploadSession) -> QueueResult<()> {
        check_assets(&session)?;
        self.mutate(move |snapshot| {
            match snapshot.position(&session.id) {
                Some(index) => snapshot.sessions[index] = session,
                None => snapshot.sessions.push(session),
            }
            Ok(())
        })
        .await
    }

    /// Remove a session; returns whether it was queued
    pub async fn remove_session(&self, session_id: &str) -> QueueResult<bool> {
        self.mutate(|snapshot| {
            let before = snapshot.sessions.len();
            snapshot.sessions.retain(|s| s.id != session_id);
            Ok(snapshot.sessions.len() != before)
        })
        .await
    }

    /// Read-modify-write one session under the store lock
    ///
    /// Returns the session as persisted.
    pub async fn update_session<F>(&self, session_id: &str, f: F) -> QueueResult<UploadSession>
    where
        F: FnOnce(&mut UploadSession),
    {
        self.mutate(|snapshot| {
            let index = snapshot
                .position(session_id)
                .ok_or_else(|| QueueError::SessionNotFound(session_id.to_string()))?;
            let session = &mut snapshot.sessions[index];
            f(session);
            session.id = session_id.to_string();
            check_assets(session)?;
            Ok(session.clone())
        })
        .await
    }

    /// Apply `f` to every session in one write; returns what `f` reported
    pub async fn update_all<F>(&self, mut f: F) -> QueueResult<usize>
    where
        F: FnMut(&mut UploadSession) -> usize,
    {
        self.mutate(|snapshot| Ok(snapshot.sessions.iter_mut().map(&mut f).sum()))
            .await
    }

    async fn mutate<R, F>(&self, f: F) -> QueueResult<R>
    where
        F: FnOnce(&mut QueueSnapshot) -> QueueResult<R>,
    {
        let mut guard = self.state.lock().await;
        let current = loaded(&mut guard, &self.path).await?;

        let mut next = current.clone();
        let result = f(&mut next)?;
        write_atomic(&self.path, &next).await?;
        *current = next;

        Ok(result)
    }
}

fn check_assets(session: &UploadSession) -> QueueResult<()> {
    match session.duplicate_asset_id() {
        Some(asset_id) => Err(QueueError::DuplicateAsset {
            session_id: session.id.clone(),
            asset_id: asset_id.to_string(),
        }),
        None => Ok(()),
    }
}

async fn loaded<'a>(
    slot: &'a mut Option<Owned>,
    path: &Path,
) -> QueueResult<&'a mut QueueSnapshot> {
    let owned = match slot.take() {
        Some(owned) => owned,
        None => {
            let lock = acquire_lock(path)?;
            let snapshot = read_snapshot(path).await?;
            log::debug!(
                "Loaded upload queue from {:?}: {} sessions",
                path,
                snapshot.sessions.len()
            );
            Owned {
                snapshot,
                _lock: lock,
            }
        }
    };
    Ok(&mut slot.insert(owned).snapshot)
}

fn lock_path(path: &Path) -> PathBuf {
    sibling_path(path, ".lock")
}

/// Exclusive, non-blocking lock on the queue's `.lock` sibling
fn acquire_lock(path: &Path) -> QueueResult<File> {
    let lock_path = lock_path(path);
    if let Some(parent) = lock_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => {
            log::error!("Upload queue {:?} is locked by another owner", path);
            Err(QueueError::Locked(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

async fn read_snapshot(path: &Path) -> QueueResult<QueueSnapshot> {
    match tokio::fs::read(path).await {
        Ok(bytes) if bytes.iter().all(|b| b.is_ascii_whitespace()) => Ok(QueueSnapshot::default()),
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(QueueSnapshot::default()),
        Err(e) => Err(e.into()),
    }
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| QUEUE_FILE_NAME.into());
    name.push(suffix);
    path.with_file_name(name)
}

fn temp_path(path: &Path) -> PathBuf {
    sibling_path(path, ".tmp")
}

/// Replace the queue file all-or-nothing: write a sibling, fsync, rename
async fn write_atomic(path: &Path, snapshot: &QueueSnapshot) -> QueueResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let data = serde_json::to_vec_pretty(snapshot)?;
    let tmp = temp_path(path);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(&data).await?;
    file.sync_all().await?;
    drop(file);

    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::session;
    use crate::models::StepState;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_missing_file_is_empty_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::in_dir(dir.path());

        assert!(store.list_sessions().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order_and_states() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::in_dir(dir.path());

        let mut first = session("s1", &["a", "b"]);
        first.assets[1].state = AssetState::Failed;
        first.assets[1].last_error = Some("HTTP 503".to_string());
        let mut second = session("s2", &["c"]);
        second.assets[0].state = AssetState::Uploaded;
        second.manifest_state = StepState::Done;
        let third = session("s3", &["d", "e", "f"]);

        for s in [&first, &second, &third] {
            store.add_session(s.clone()).await.unwrap();
        }
        drop(store);

        let fresh = QueueStore::in_dir(dir.path());
        let sessions = fresh.list_sessions().await.unwrap();
        assert_eq!(sessions, vec![first, second, third]);
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::in_dir(dir.path());
        let s1 = session("s1", &["a"]);

        store.upsert_session(s1.clone()).await.unwrap();
        let once = std::fs::read(store.path()).unwrap();
        store.upsert_session(s1.clone()).await.unwrap();
        let twice = std::fs::read(store.path()).unwrap();

        assert_eq!(once, twice);
        assert_eq!(store.list_sessions().await.unwrap(), vec![s1]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_matching_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::in_dir(dir.path());
        store.add_session(session("s1", &["a"])).await.unwrap();
        store.add_session(session("s2", &["b"])).await.unwrap();

        let mut changed = session("s1", &["a"]);
        changed.public_url = Some("https://gallery.example.com/s1".to_string());
        store.upsert_session(changed.clone()).await.unwrap();

        let sessions = store.list_sessions().await.unwrap();
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0], changed);
    }

    #[tokio::test]
    async fn test_add_then_remove_keeps_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::in_dir(dir.path());
        let s1 = session("s1", &["a"]);
        let s2 = session("s2", &["b", "c"]);

        store.add_session(s1).await.unwrap();
        store.add_session(s2.clone()).await.unwrap();
        assert!(store.remove_session("s1").await.unwrap());
        assert!(!store.remove_session("s1").await.unwrap());
        drop(store);

        let fresh = QueueStore::in_dir(dir.path());
        assert_eq!(fresh.list_sessions().await.unwrap(), vec![s2]);
    }

    #[tokio::test]
    async fn test_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::in_dir(dir.path());
        store.add_session(session("s1", &["a"])).await.unwrap();

        let result = store.add_session(session("s1", &["b"])).await;
        assert!(matches!(result, Err(QueueError::DuplicateSession(id)) if id == "s1"));

        let result = store.upsert_session(session("s2", &["x", "x"])).await;
        assert!(matches!(result, Err(QueueError::DuplicateAsset { .. })));
        assert_eq!(store.list_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_queue_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::in_dir(dir.path());
        let s1 = session("s1", &["a"]);
        store.add_session(s1.clone()).await.unwrap();
        let on_disk = std::fs::read(store.path()).unwrap();

        // A directory squatting on the temp path makes the next write fail
        std::fs::create_dir(temp_path(store.path())).unwrap();
        assert!(store.add_session(session("s2", &["b"])).await.is_err());

        assert_eq!(store.list_sessions().await.unwrap(), vec![s1]);
        assert_eq!(std::fs::read(store.path()).unwrap(), on_disk);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(QUEUE_FILE_NAME), b"{\"sessions\": [").unwrap();
        let store = QueueStore::in_dir(dir.path());

        assert!(matches!(store.load().await, Err(QueueError::Json(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(QueueStore::in_dir(dir.path()));
        let ids: Vec<String> = (0..8).map(|i| format!("a{}", i)).collect();
        let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        store.add_session(session("s1", &id_refs)).await.unwrap();

        let mut handles = Vec::new();
        for id in ids.clone() {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update_session("s1", |s| {
                        if let Some(asset) = s.asset_mut(&id) {
                            asset.state = AssetState::Uploaded;
                        }
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        drop(store);

        let fresh = QueueStore::in_dir(dir.path());
        let persisted = fresh.get_session("s1").await.unwrap().unwrap();
        assert!(persisted.all_uploaded());
        assert_eq!(fresh.count_pending_assets().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_second_owner_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let running = QueueStore::in_dir(dir.path());
        running.add_session(session("s1", &["a"])).await.unwrap();

        let other = QueueStore::in_dir(dir.path());
        let result = other.add_session(session("s2", &["b"])).await;
        assert!(matches!(result, Err(QueueError::Locked(_))));

        // The owner's next write must not lose anything
        running
            .update_session("s1", |s| s.public_url = Some("u".to_string()))
            .await
            .unwrap();
        let on_disk = QueueStore::read_unlocked(running.path()).await.unwrap();
        let ids: Vec<&str> = on_disk.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["s1"]);

        drop(running);
        let next = QueueStore::in_dir(dir.path());
        next.add_session(session("s2", &["b"])).await.unwrap();
        assert_eq!(next.list_sessions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::in_dir(dir.path());

        let result = store.update_session("nope", |_| {}).await;
        assert!(matches!(result, Err(QueueError::SessionNotFound(_))));
    }
}
