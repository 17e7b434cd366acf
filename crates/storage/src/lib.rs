//! Remote storage capability set.
//!
//! Two structurally different protocols sit behind the same pair of
//! traits: [`StorageBackend`] opens authenticated sessions and
//! [`RemoteSession`] performs the file operations. Callers never see
//! which variant they are talking to, so a test double can stand in for
//! either.
//!
//! - [`sftp`]: stream-transfer backend over SSH/SFTP.
//! - [`share`]: share-tree backend over an SMB share mounted locally.
//! - [`memory`]: in-process tree for tests and local development.

pub mod error;
pub mod memory;
pub mod path;
pub mod sftp;
pub mod share;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use nasrelay_protocol::EntryKind;

pub use error::StorageError;
pub use memory::MemoryBackend;
pub use path::PathResolver;
pub use sftp::{SftpBackend, SftpConfig};
pub use share::{DEFAULT_MOUNT_TABLE, ShareAddress, ShareTreeBackend};

/// A boxed future returned by backend and session methods.
pub type StorageFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StorageError>> + Send + 'a>>;

/// A boxed future that cannot fail (used by [`RemoteSession::close`]).
pub type CloseFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Which protocol family a backend speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// File transfer over a byte stream (SFTP).
    StreamTransfer,
    /// Tree of a network share (SMB).
    ShareTree,
    /// In-process tree.
    Memory,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::StreamTransfer => f.write_str("stream-transfer"),
            BackendKind::ShareTree => f.write_str("share-tree"),
            BackendKind::Memory => f.write_str("memory"),
        }
    }
}

/// Credentials passed through to the backend when a session is opened.
#[derive(Clone, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub domain: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("domain", &self.domain)
            .finish()
    }
}

/// An entry returned by [`RemoteSession::list`].
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteEntry {
    pub name: String,
    pub size: Option<u64>,
    pub kind: EntryKind,
    pub modified_at: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    /// Returns `true` for the `.` and `..` pseudo-entries.
    pub fn is_pseudo(&self) -> bool {
        self.name == "." || self.name == ".."
    }
}

/// Opens sessions against one configured remote.
pub trait StorageBackend: Send + Sync {
    /// Protocol family of this backend.
    fn kind(&self) -> BackendKind;

    /// Native path separator of the remote tree.
    fn separator(&self) -> char;

    /// Opens an authenticated session. Fails with [`StorageError::Connection`].
    fn open<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> StorageFuture<'a, Box<dyn RemoteSession>>;
}

/// An open conversation with a backend, owned by exactly one request.
///
/// Paths are backend-native strings produced by [`PathResolver`].
pub trait RemoteSession: Send + Sync {
    /// Lists a directory. Order is unspecified.
    fn list<'a>(&'a self, path: &'a str) -> StorageFuture<'a, Vec<RemoteEntry>>;

    /// Reads a whole file.
    fn read_file<'a>(&'a self, path: &'a str) -> StorageFuture<'a, Vec<u8>>;

    /// Creates or replaces a file.
    fn write_file<'a>(&'a self, path: &'a str, data: Vec<u8>) -> StorageFuture<'a, ()>;

    /// Returns whether `path` exists.
    fn exists<'a>(&'a self, path: &'a str) -> StorageFuture<'a, bool>;

    /// Creates a directory. Succeeds silently if it already exists.
    fn ensure_directory<'a>(&'a self, path: &'a str) -> StorageFuture<'a, ()>;

    /// Deletes a file.
    fn delete<'a>(&'a self, path: &'a str) -> StorageFuture<'a, ()>;

    /// Tears the session down. Failures are logged, never returned.
    fn close(self: Box<Self>) -> CloseFuture;
}
