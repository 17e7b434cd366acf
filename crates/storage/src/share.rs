//! Share-tree backend over a locally mounted SMB share.
//!
//! The share (`//host/share`) is mounted by the operating system, which
//! owns the SMB conversation. Opening a session checks the mount table:
//! the mount point must carry this share, mounted as the configured user
//! and domain. Remote paths keep the share's native `\` separator and are
//! mapped onto the mount point here.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use nasrelay_protocol::EntryKind;
use tracing::debug;

use crate::{
    BackendKind, CloseFuture, Credentials, RemoteEntry, RemoteSession, StorageBackend,
    StorageError, StorageFuture,
};

/// Parsed `//host/share` address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareAddress {
    pub host: String,
    pub share: String,
}

impl ShareAddress {
    /// Parses `//host/share` or `\\host\share`; anything after the share
    /// name is ignored.
    pub fn parse(address: &str) -> Result<Self, StorageError> {
        let mut parts = address
            .split(['/', '\\'])
            .filter(|s| !s.is_empty());

        match (parts.next(), parts.next()) {
            (Some(host), Some(share)) => Ok(Self {
                host: host.to_string(),
                share: share.to_string(),
            }),
            _ => Err(StorageError::Connection(format!(
                "invalid share address: {address}"
            ))),
        }
    }
}

impl std::fmt::Display for ShareAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "//{}/{}", self.host, self.share)
    }
}

/// Kernel mount table listing SMB mounts with their options.
pub const DEFAULT_MOUNT_TABLE: &str = "/proc/mounts";

const SMB_FS_TYPES: [&str; 3] = ["cifs", "smb3", "smbfs"];

/// Backend for an SMB share mounted at `mount_point`.
#[derive(Debug, Clone)]
pub struct ShareTreeBackend {
    address: ShareAddress,
    mount_point: PathBuf,
    mount_table: PathBuf,
}

impl ShareTreeBackend {
    pub fn new(address: ShareAddress, mount_point: PathBuf) -> Self {
        Self {
            address,
            mount_point,
            mount_table: PathBuf::from(DEFAULT_MOUNT_TABLE),
        }
    }

    /// Reads mounts from `path` instead of [`DEFAULT_MOUNT_TABLE`].
    pub fn with_mount_table(mut self, path: impl Into<PathBuf>) -> Self {
        self.mount_table = path.into();
        self
    }

    /// Checks that the mount point carries this share under `credentials`.
    ///
    /// Skipped when no username is configured.
    async fn verify_mount(&self, credentials: &Credentials) -> Result<(), StorageError> {
        if credentials.username.is_empty() {
            return Ok(());
        }

        let table = tokio::fs::read_to_string(&self.mount_table)
            .await
            .map_err(|e| {
                StorageError::Connection(format!(
                    "cannot verify share credentials, mount table {} unreadable: {e}",
                    self.mount_table.display()
                ))
            })?;
        let mount_point = tokio::fs::canonicalize(&self.mount_point)
            .await
            .unwrap_or_else(|_| self.mount_point.clone());

        // Later mounts shadow earlier ones on the same target.
        let Some(mount) = table
            .lines()
            .filter_map(MountEntry::parse)
            .rfind(|m| Path::new(&m.target) == mount_point.as_path())
        else {
            return Err(StorageError::Connection(format!(
                "{} is not a mount point for {}",
                self.mount_point.display(),
                self.address
            )));
        };

        mount.check(&self.address, credentials)
    }
}

/// One line of the mount table.
#[derive(Debug)]
struct MountEntry {
    source: String,
    target: String,
    fs_type: String,
    options: String,
}

impl MountEntry {
    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        Some(Self {
            source: unescape_mount_field(fields.next()?),
            target: unescape_mount_field(fields.next()?),
            fs_type: fields.next()?.to_string(),
            options: fields.next().unwrap_or_default().to_string(),
        })
    }

    fn option(&self, keys: &[&str]) -> Option<&str> {
        self.options.split(',').find_map(|opt| {
            let (key, value) = opt.split_once('=')?;
            keys.contains(&key).then_some(value)
        })
    }

    fn check(&self, address: &ShareAddress, credentials: &Credentials) -> Result<(), StorageError> {
        if !SMB_FS_TYPES.contains(&self.fs_type.as_str()) {
            return Err(StorageError::Connection(format!(
                "{} is a {} mount, not an SMB share",
                self.target, self.fs_type
            )));
        }

        let source = ShareAddress::parse(&self.source)?;
        if !source.host.eq_ignore_ascii_case(&address.host)
            || !source.share.eq_ignore_ascii_case(&address.share)
        {
            return Err(StorageError::Connection(format!(
                "{} carries {source}, expected {address}",
                self.target
            )));
        }

        match self.option(&["username", "user"]) {
            Some(user) if user.eq_ignore_ascii_case(&credentials.username) => {}
            Some(user) => {
                return Err(StorageError::Connection(format!(
                    "{address} is mounted as {user}, configured user is {}",
                    credentials.username
                )));
            }
            None => {
                return Err(StorageError::Connection(format!(
                    "{address} is mounted without a user, configured user is {}",
                    credentials.username
                )));
            }
        }

        // The kernel omits `domain=` when the mount did not set one.
        let mounted_domain = self
            .option(&["domain", "dom"])
            .filter(|_| !credentials.domain.is_empty());
        if let Some(domain) = mounted_domain.filter(|d| !d.eq_ignore_ascii_case(&credentials.domain)) {
            return Err(StorageError::Connection(format!(
                "{address} is mounted in domain {domain}, configured domain is {}",
                credentials.domain
            )));
        }

        Ok(())
    }
}

/// Decodes the octal escapes (`\040` for a space) used in mount tables.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let code = bytes[i + 1..i + 4]
                .iter()
                .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
            if let Ok(byte) = u8::try_from(code) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

impl StorageBackend for ShareTreeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ShareTree
    }

    fn separator(&self) -> char {
        '\\'
    }

    fn open<'a>(
        &'a self,
        credentials: &'a Credentials,
    ) -> StorageFuture<'a, Box<dyn RemoteSession>> {
        Box::pin(async move {
            let mounted = tokio::fs::metadata(&self.mount_point)
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false);
            if !mounted {
                return Err(StorageError::Connection(format!(
                    "share {} is not mounted at {}",
                    self.address,
                    self.mount_point.display()
                )));
            }
            self.verify_mount(credentials).await?;

            debug!(
                share = %self.address,
                user = %credentials.username,
                domain = %credentials.domain,
                "share session opened"
            );

            Ok(Box::new(ShareTreeSession {
                root: self.mount_point.clone(),
            }) as Box<dyn RemoteSession>)
        })
    }
}

struct ShareTreeSession {
    root: PathBuf,
}

impl ShareTreeSession {
    /// Maps a share path onto the mount point.
    fn local(&self, path: &str) -> Result<PathBuf, StorageError> {
        let mut local = self.root.clone();
        for segment in path.split(['/', '\\']).filter(|s| !s.is_empty() && *s != ".") {
            if segment == ".." {
                return Err(StorageError::Protocol(format!(
                    "{path}: escapes the share root"
                )));
            }
            local.push(segment);
        }
        Ok(local)
    }
}

async fn entry_of(entry: tokio::fs::DirEntry) -> RemoteEntry {
    let name = entry.file_name().to_string_lossy().into_owned();
    // Follows symlinks; a dangling link stays unclassified.
    let meta = tokio::fs::metadata(entry.path()).await.ok();

    let kind = match &meta {
        Some(m) if m.is_dir() => EntryKind::Directory,
        Some(m) if m.is_file() => EntryKind::File,
        _ => EntryKind::Unknown,
    };

    RemoteEntry {
        name,
        size: meta.as_ref().filter(|m| m.is_file()).map(|m| m.len()),
        kind,
        modified_at: meta
            .as_ref()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from),
    }
}

impl RemoteSession for ShareTreeSession {
    fn list<'a>(&'a self, path: &'a str) -> StorageFuture<'a, Vec<RemoteEntry>> {
        Box::pin(async move {
            let dir = self.local(path)?;
            let mut reader = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| StorageError::from_io(e, path, StorageError::Protocol))?;

            let mut entries = Vec::new();
            while let Some(entry) = reader
                .next_entry()
                .await
                .map_err(|e| StorageError::from_io(e, path, StorageError::Protocol))?
            {
                entries.push(entry_of(entry).await);
            }
            Ok(entries)
        })
    }

    fn read_file<'a>(&'a self, path: &'a str) -> StorageFuture<'a, Vec<u8>> {
        Box::pin(async move {
            let file = self.local(path)?;
            tokio::fs::read(&file)
                .await
                .map_err(|e| StorageError::from_io(e, path, StorageError::Protocol))
        })
    }

    fn write_file<'a>(&'a self, path: &'a str, data: Vec<u8>) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let file = self.local(path)?;
            tokio::fs::write(&file, data)
                .await
                .map_err(|e| StorageError::Write(format!("{path}: {e}")))
        })
    }

    fn exists<'a>(&'a self, path: &'a str) -> StorageFuture<'a, bool> {
        Box::pin(async move {
            let target = self.local(path)?;
            tokio::fs::try_exists(&target)
                .await
                .map_err(|e| StorageError::Protocol(format!("{path}: {e}")))
        })
    }

    fn ensure_directory<'a>(&'a self, path: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let dir = self.local(path)?;
            match tokio::fs::create_dir(&dir).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    match tokio::fs::metadata(&dir).await {
                        Ok(m) if m.is_dir() => Ok(()),
                        _ => Err(StorageError::Write(format!(
                            "{path}: exists and is not a directory"
                        ))),
                    }
                }
                Err(e) => Err(StorageError::Write(format!("{path}: {e}"))),
            }
        })
    }

    fn delete<'a>(&'a self, path: &'a str) -> StorageFuture<'a, ()> {
        Box::pin(async move {
            let file = self.local(path)?;
            tokio::fs::remove_file(&file)
                .await
                .map_err(|e| StorageError::from_io(e, path, StorageError::Write))
        })
    }

    fn close(self: Box<Self>) -> CloseFuture {
        Box::pin(async move {
            debug!(root = %self.root.display(), "share session closed");
        })
    }
}
