//! Stream-transfer backend over SSH/SFTP.
//!
//! `ssh2` is a blocking library, so every remote call runs on the tokio
//! blocking pool while the session sits behind a mutex. One session is
//! one TCP connection; nothing is pooled.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::DateTime;
use nasrelay_protocol::EntryKind;
use ssh2::{ErrorCode, FileStat, Session, Sftp};
use tracing::{debug, warn};

use crate::{
    BackendKind, CloseFuture, Credentials, RemoteEntry, RemoteSession, StorageBackend,
    StorageError, StorageFuture,
};

/// SFTP status code for a missing file.
const FX_NO_SUCH_FILE: i32 = 2;
/// SFTP status code for a missing path component.
const FX_NO_SUCH_PATH: i32 = 10;

/// Connection settings for the SFTP backend.
#[derive(Debug, Clone)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl Default for SftpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 22,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Opens one SSH connection per session.
#[derive(Debug, Clone)]
pub struct SftpBackend {
    config: SftpConfig,
}

impl SftpBackend {
    pub fn new(config: SftpConfig) -> Self {
        Self { config }
    }
}

impl StorageBackend for SftpBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::StreamTransfer
    }

    fn separator(&self) -> char {
        '/'
    }

    fn open<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> StorageFuture<'a, Box<dyn RemoteSession>> {
        let config = self.config.clone();
        let credentials = credentials.clone();
        Box::pin(async move {
            let session = tokio::task::spawn_blocking(move || connect(&config, &credentials))
                .await
                .map_err(|e| StorageError::Connection(format!("connect task failed: {e}")))??;
            Ok(Box::new(session) as Box<dyn RemoteSession>)
        })
    }
}

fn connect(config: &SftpConfig, credentials: &Credentials) -> Result<SftpSession, StorageError> {
    let conn_err = |e: &dyn std::fmt::Display| {
        StorageError::Connection(format!("{}:{}: {e}", config.host, config.port))
    };

    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()
        .map_err(|e| conn_err(&e))?
        .next()
        .ok_or_else(|| conn_err(&"host did not resolve"))?;

    let tcp = TcpStream::connect_timeout(&addr, config.timeout).map_err(|e| conn_err(&e))?;

    let mut session = Session::new().map_err(|e| conn_err(&e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(config.timeout.as_millis().min(u32::MAX as u128) as u32);
    session.handshake().map_err(|e| conn_err(&e))?;
    session
        .userauth_password(&credentials.username, &credentials.password)
        .map_err(|e| conn_err(&e))?;
    if !session.authenticated() {
        return Err(conn_err(&"authentication rejected"));
    }

    let sftp = session.sftp().map_err(|e| conn_err(&e))?;
    debug!(host = %config.host, port = config.port, "sftp session opened");

    Ok(SftpSession {
        inner: Arc::new(Mutex::new(Connection { session, sftp })),
    })
}

struct Connection {
    session: Session,
    sftp: Sftp,
}

struct SftpSession {
    inner: Arc<Mutex<Connection>>,
}

impl SftpSession {
    /// Runs `op` on the blocking pool with the connection locked.
    fn blocking<T, F>(&self, op: F) -> StorageFuture<'static, T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            tokio::task::spawn_blocking(move || {
                let conn = inner
                    .lock()
                    .map_err(|_| StorageError::Protocol("sftp session poisoned".into()))?;
                op(&conn)
            })
            .await
            .map_err(|e| StorageError::Protocol(format!("sftp task failed: {e}")))?
        })
    }
}

/// Maps an `ssh2` error: missing paths become `NotFound`, the rest `other`.
fn map_err(err: ssh2::Error, path: &str, other: fn(String) -> StorageError) -> StorageError {
    match err.code() {
        ErrorCode::SFTP(FX_NO_SUCH_FILE) | ErrorCode::SFTP(FX_NO_SUCH_PATH) => {
            StorageError::NotFound(path.to_string())
        }
        _ => other(format!("{path}: {err}")),
    }
}

/// An empty remote path means the login directory.
fn remote(path: &str) -> &Path {
    if path.is_empty() {
        Path::new(".")
    } else {
        Path::new(path)
    }
}

/// SFTP listings carry permissions only when the server sends them; without
/// them there is no reliable way to tell a file from a directory.
fn classify(stat: &FileStat) -> EntryKind {
    match stat.perm {
        None => EntryKind::Unknown,
        Some(_) if stat.is_dir() => EntryKind::Directory,
        Some(_) if stat.is_file() => EntryKind::File,
        Some(_) => EntryKind::Unknown,
    }
}

impl RemoteSession for SftpSession {
    fn list<'a>(&'a self, path: &'a str) -> StorageFuture<'a, Vec<RemoteEntry>> {
        let path = path.to_string();
        self.blocking(move |conn| {
            let entries = conn
                .sftp
                .readdir(remote(&path))
                .map_err(|e| map_err(e, &path, StorageError::Protocol))?;

            Ok(entries
                .into_iter()
                .filter_map(|(entry_path, stat)| {
                    let name = entry_path.file_name()?.to_string_lossy().into_owned();
                    let kind = classify(&stat);
                    Some(RemoteEntry {
                        name,
                        size: if kind == EntryKind::Directory {
                            None
                        } else {
                            stat.size
                        },
                        kind,
                        modified_at: stat
                            .mtime
                            .and_then(|t| DateTime::from_timestamp(t as i64, 0)),
                    })
                })
                .collect())
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> StorageFuture<'a, Vec<u8>> {
        let path = path.to_string();
        self.blocking(move |conn| {
            let mut file = conn
                .sftp
                .open(remote(&path))
                .map_err(|e| map_err(e, &path, StorageError::Protocol))?;
            let mut data = Vec::new();
            file.read_to_end(&mut data)
                .map_err(|e| StorageError::Protocol(format!("{path}: {e}")))?;
            Ok(data)
        })
    }

    fn write_file<'a>(&'a self, path: &'a str, data: Vec<u8>) -> StorageFuture<'a, ()> {
        let path = path.to_string();
        self.blocking(move |conn| {
            let mut file = conn
                .sftp
                .create(remote(&path))
                .map_err(|e| StorageError::Write(format!("{path}: {e}")))?;
            file.write_all(&data)
                .and_then(|_| file.flush())
                .map_err(|e| StorageError::Write(format!("{path}: {e}")))?;
            Ok(())
        })
    }

    fn exists<'a>(&'a self, path: &'a str) -> StorageFuture<'a, bool> {
        let path = path.to_string();
        self.blocking(move |conn| match conn.sftp.stat(remote(&path)) {
            Ok(_) => Ok(true),
            Err(e) => match map_err(e, &path, StorageError::Protocol) {
                StorageError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        })
    }

    fn ensure_directory<'a>(&'a self, path: &'a str) -> StorageFuture<'a, ()> {
        let path = path.to_string();
        self.blocking(move |conn| {
            let dir = remote(&path);
            match conn.sftp.mkdir(dir, 0o755) {
                Ok(()) => Ok(()),
                // Servers disagree on the status code for an existing
                // directory, so ask the tree instead of parsing the error.
                Err(e) => match conn.sftp.stat(dir) {
                    Ok(stat) if stat.is_dir() => Ok(()),
                    _ => Err(StorageError::Write(format!("{path}: {e}"))),
                },
            }
        })
    }

    fn delete<'a>(&'a self, path: &'a str) -> StorageFuture<'a, ()> {
        let path = path.to_string();
        self.blocking(move |conn| {
            conn.sftp
                .unlink(remote(&path))
                .map_err(|e| map_err(e, &path, StorageError::Write))
        })
    }

    fn close(self: Box<Self>) -> CloseFuture {
        let inner = self.inner;
        Box::pin(async move {
            let result = tokio::task::spawn_blocking(move || {
                let conn = inner
                    .lock()
                    .map_err(|_| "sftp session poisoned".to_string())?;
                conn.session
                    .disconnect(None, "session closed", None)
                    .map_err(|e| e.to_string())
            })
            .await;

            match result {
                Ok(Ok(())) => debug!("sftp session closed"),
                Ok(Err(e)) => warn!(error = %e, "sftp disconnect failed"),
                Err(e) => warn!(error = %e, "sftp disconnect task failed"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stat(perm: Option<u32>) -> FileStat {
        FileStat {
            size: Some(10),
            uid: None,
            gid: None,
            perm,
            atime: None,
            mtime: None,
        }
    }

    #[test]
    fn classify_without_permissions_is_unknown() {
        assert_eq!(classify(&stat(None)), EntryKind::Unknown);
    }

    #[test]
    fn classify_uses_permission_bits() {
        assert_eq!(classify(&stat(Some(0o040755))), EntryKind::Directory);
        assert_eq!(classify(&stat(Some(0o100644))), EntryKind::File);
        assert_eq!(classify(&stat(Some(0o120777))), EntryKind::Unknown);
    }

    #[test]
    fn empty_path_is_login_directory() {
        assert_eq!(remote(""), Path::new("."));
        assert_eq!(remote("/srv/a"), Path::new("/srv/a"));
    }

    #[tokio::test]
    async fn unreachable_host_is_connection_error() {
        let backend = SftpBackend::new(SftpConfig {
            host: "127.0.0.1".into(),
            port: 1,
            timeout: Duration::from_millis(200),
        });
        let result = backend.open(&Credentials::default()).await;
        assert!(matches!(result, Err(StorageError::Connection(_))));
    }
}
