//! In-process storage backend.
//!
//! Holds a `/`-separated tree in memory. Used by the test suites of the
//! crates above this one and by `kind = "memory"` for local development.
//! Failures can be injected per path to exercise error handling.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nasrelay_protocol::EntryKind;

use crate::{
    BackendKind, CloseFuture, Credentials, RemoteEntry, RemoteSession, StorageBackend,
    StorageError, StorageFuture,
};

#[derive(Debug, Default)]
struct MemoryState {
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    fail_connect: bool,
    fail_reads: HashSet<String>,
    fail_writes: HashSet<String>,
    hidden_once: HashSet<String>,
    unclassified: bool,
    created_dirs: Vec<String>,
    sessions_opened: usize,
    sessions_closed: usize,
    remote_calls: usize,
}

/// In-memory backend. Clones share the same tree.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

fn key(path: &str) -> String {
    path.trim_matches('/').to_string()
}

fn parent(key: &str) -> &str {
    key.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
}

fn leaf(key: &str) -> &str {
    key.rsplit_once('/').map(|(_, l)| l).unwrap_or(key)
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Creates a directory (and its parents) without going through a session.
    pub fn with_directory(self, path: &str) -> Self {
        {
            let mut state = self.state();
            let mut acc = String::new();
            for segment in key(path).split('/').filter(|s| !s.is_empty()) {
                if !acc.is_empty() {
                    acc.push('/');
                }
                acc.push_str(segment);
                state.dirs.insert(acc.clone());
            }
        }
        self
    }

    /// Stores a file without going through a session.
    pub fn insert_file(&self, path: &str, data: &[u8]) {
        self.state().files.insert(key(path), data.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state().files.get(&key(path)).cloned()
    }

    pub fn has_directory(&self, path: &str) -> bool {
        let k = key(path);
        k.is_empty() || self.state().dirs.contains(&k)
    }

    /// Directories created through [`RemoteSession::ensure_directory`], in order.
    pub fn created_directories(&self) -> Vec<String> {
        self.state().created_dirs.clone()
    }

    /// Makes every subsequent `open` fail with a connection error.
    pub fn fail_connections(&self, fail: bool) {
        self.state().fail_connect = fail;
    }

    /// Makes reads of `path` fail.
    pub fn fail_reads_of(&self, path: &str) {
        self.state().fail_reads.insert(key(path));
    }

    /// Makes writes to `path` fail.
    pub fn fail_writes_of(&self, path: &str) {
        self.state().fail_writes.insert(key(path));
    }

    /// Makes the next existence probe of `path` report absence even if it
    /// exists, as when another client creates it concurrently.
    pub fn hide_once(&self, path: &str) {
        self.state().hidden_once.insert(key(path));
    }

    /// Reports every listed entry as [`EntryKind::Unknown`].
    pub fn unclassified_listings(&self, on: bool) {
        self.state().unclassified = on;
    }

    pub fn sessions_opened(&self) -> usize {
        self.state().sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.state().sessions_closed
    }

    /// Number of session calls performed (excluding open and close).
    pub fn remote_calls(&self) -> usize {
        self.state().remote_calls
    }
}

impl StorageBackend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    fn separator(&self) -> char {
        '/'
    }

    fn open<'a>(
        &'a self,
        _credentials: &'a Credentials,
    ) -> StorageFuture<'a, Box<dyn RemoteSession>> {
        Box::pin(async move {
            let mut state = self.state();
            if state.fail_connect {
                return Err(StorageError::Connection("memory backend offline".into()));
            }
            state.sessions_opened += 1;
            drop(state);
            Ok(Box::new(MemorySession {
                backend: self.clone(),
            }) as Box<dyn RemoteSession>)
        })
    }
}

struct MemorySession {
    backend: MemoryBackend,
}

impl MemorySession {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        let mut state = self.backend.state();
        state.remote_calls += 1;
        state
    }
}

impl RemoteSession for MemorySession {
    fn list<'a>(&'a self, path: &'a str) -> StorageFuture<'a, Vec<RemoteEntry>> {
        Box::pin(async move {
            let state = self.state();
            let dir = key(path);
            if !dir.is_empty() && !state.dirs.contains(&dir) {
                return Err(StorageError::NotFound(path.to_string()));
            }

            let classify = |kind| {
                if state.unclassified {
                    EntryKind::Unknown
                } else {
                    kind
                }
            };

            let mut entries: Vec<RemoteEntry> = state
                .dirs
                .iter()
                .filter(|d| parent(d) == dir)
                .map(|d| RemoteEntry {
                    name: leaf(d).to_string(),
                    size: None,
                    kind: classify(EntryKind::Directory),
                    modified_at: None,
                })
                .collect();

            entries.extend(
                state
                    .files
                    .iter()
                    .filter(|(f, _)| parent(f) == dir)
                    .map(|(f, data)| RemoteEntry {
                        name: leaf(f).to_string(),
                        size: Some(data.len() as u64),
                        kind: classify(EntryKind::File),
                        modified_at: None,
                    }),
            );

            Ok(entries)
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> StorageFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let state = self.state();
            let k = key(path);
            if state.fail_reads.contains(&k) {
                return Err(StorageError::Protocol(format!("{path}: read failed")));
            }
            state
                .files
                .get(&k)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(path.to_string()))
        })
    }

    fn write_file<'a>(&'a self, path: &'a str, data: Vec<u8>) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state();
            let k = key(path);
            let dir = parent(&k).to_string();
            if state.fail_writes.contains(&k) {
                return Err(StorageError::Write(format!("{path}: write refused")));
            }
            if !dir.is_empty() && !state.dirs.contains(&dir) {
                return Err(StorageError::Write(format!("{path}: parent missing")));
            }
            if state.dirs.contains(&k) {
                return Err(StorageError::Write(format!("{path}: is a directory")));
            }
            state.files.insert(k, data);
            Ok(())
        })
    }

    fn exists<'a>(&'a self, path: &'a str) -> StorageFuture<'a, bool> {
        Box::pin(async move {
            let mut state = self.state();
            let k = key(path);
            if state.hidden_once.remove(&k) {
                return Ok(false);
            }
            Ok(k.is_empty() || state.dirs.contains(&k) || state.files.contains_key(&k))
        })
    }

    fn ensure_directory<'a>(&'a self, path: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state();
            let k = key(path);
            if k.is_empty() || state.dirs.contains(&k) {
                return Ok(());
            }
            if state.files.contains_key(&k) {
                return Err(StorageError::Write(format!("{path}: a file is in the way")));
            }
            let dir = parent(&k);
            if !dir.is_empty() && !state.dirs.contains(dir) {
                return Err(StorageError::Write(format!("{path}: parent missing")));
            }
            state.dirs.insert(k.clone());
            state.created_dirs.push(k);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, path: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state();
            match state.files.remove(&key(path)) {
                Some(_) => Ok(()),
                None => Err(StorageError::NotFound(path.to_string())),
            }
        })
    }

    fn close(self: Box<Self>) -> CloseFuture {
        Box::pin(async move {
            self.backend.state().sessions_closed += 1;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_directory_is_idempotent() {
        let backend = MemoryBackend::new().with_directory("base");
        let session = backend.open(&Credentials::default()).await.unwrap();

        session.ensure_directory("base/1").await.unwrap();
        session.ensure_directory("base/1").await.unwrap();

        assert_eq!(backend.created_directories(), vec!["base/1".to_string()]);
        session.close().await;
        assert_eq!(backend.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn list_returns_direct_children_only() {
        let backend = MemoryBackend::new().with_directory("base/1/deep");
        backend.insert_file("base/1/a-1.xml", b"a");
        backend.insert_file("base/1/deep/z.xml", b"z");
        let session = backend.open(&Credentials::default()).await.unwrap();

        let mut names: Vec<_> = session
            .list("/base/1")
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.name, e.kind))
            .collect();
        names.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(
            names,
            vec![
                ("a-1.xml".to_string(), EntryKind::File),
                ("deep".to_string(), EntryKind::Directory),
            ]
        );
    }

    #[tokio::test]
    async fn missing_paths_are_not_found() {
        let backend = MemoryBackend::new();
        let session = backend.open(&Credentials::default()).await.unwrap();

        assert!(matches!(
            session.read_file("nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            session.delete("nope").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            session.list("nope").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn write_requires_parent() {
        let backend = MemoryBackend::new();
        let session = backend.open(&Credentials::default()).await.unwrap();

        assert!(matches!(
            session.write_file("missing/a.xml", b"x".to_vec()).await,
            Err(StorageError::Write(_))
        ));
        session.write_file("a.xml", b"x".to_vec()).await.unwrap();
        assert_eq!(backend.file("a.xml"), Some(b"x".to_vec()));
    }

    #[tokio::test]
    async fn connection_failure_is_injected() {
        let backend = MemoryBackend::new();
        backend.fail_connections(true);
        assert!(matches!(
            backend.open(&Credentials::default()).await,
            Err(StorageError::Connection(_))
        ));
        assert_eq!(backend.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn hidden_path_reappears_after_one_probe() {
        let backend = MemoryBackend::new().with_directory("1");
        backend.hide_once("1");
        let session = backend.open(&Credentials::default()).await.unwrap();

        assert!(!session.exists("1").await.unwrap());
        assert!(session.exists("1").await.unwrap());
    }
}
