use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::TransferError;

/// Why a file was staged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePurpose {
    /// Bytes received from a client, waiting to be written remotely.
    UploadSource,
    /// Bytes read remotely, waiting to be sent to a client.
    DownloadStaged,
    /// One remote file waiting to be packed into an archive.
    ArchiveMember,
}

impl StagePurpose {
    fn prefix(&self) -> &'static str {
        match self {
            StagePurpose::UploadSource => "upload",
            StagePurpose::DownloadStaged => "download",
            StagePurpose::ArchiveMember => "member",
        }
    }
}

/// The staging directory.
///
/// Local file names never derive from client input: each one is
/// `<purpose>_<instance>_<counter>.stage`, where `instance` is random per
/// process and `counter` is monotonic.
#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
    instance: String,
    counter: AtomicU64,
}

impl StagingArea {
    /// Opens (creating if needed) the staging directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, TransferError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            instance: uuid::Uuid::new_v4().simple().to_string(),
            counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a new empty staged file.
    pub async fn acquire(
        &self,
        purpose: StagePurpose,
        logical_name: &str,
    ) -> Result<StagedFile, TransferError> {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let path = self
            .root
            .join(format!("{}_{}_{seq}.stage", purpose.prefix(), self.instance));

        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        debug!(path = %path.display(), name = logical_name, "staged file acquired");
        Ok(StagedFile {
            path,
            logical_name: logical_name.to_string(),
            purpose,
            released: false,
        })
    }

    /// Stages `data` in a new file.
    pub async fn stage_bytes(
        &self,
        purpose: StagePurpose,
        logical_name: &str,
        data: &[u8],
    ) -> Result<StagedFile, TransferError> {
        let staged = self.acquire(purpose, logical_name).await?;
        let mut file = staged.writer().await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(staged)
    }

    /// Removes staged files left behind by a previous process.
    ///
    /// Returns the number of files removed. Failures are logged.
    pub async fn sweep(&self) -> usize {
        let mut reader = match tokio::fs::read_dir(&self.root).await {
            Ok(r) => r,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "staging sweep failed");
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = reader.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "stage") {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) => warn!(path = %path.display(), error = %e, "failed to sweep staged file"),
                }
            }
        }
        removed
    }
}

/// A uniquely named local file owned by one operation.
///
/// Deleted exactly once: by [`release`](Self::release) or on drop. A file
/// that is already gone at release time is not an error; other deletion
/// failures are logged and swallowed.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    logical_name: String,
    purpose: StagePurpose,
    released: bool,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The name the bytes are known by outside the staging directory.
    pub fn logical_name(&self) -> &str {
        &self.logical_name
    }

    pub fn purpose(&self) -> StagePurpose {
        self.purpose
    }

    /// Opens the file for writing, truncating it.
    pub async fn writer(&self) -> Result<tokio::fs::File, TransferError> {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await?;
        Ok(file)
    }

    pub async fn read(&self) -> Result<Vec<u8>, TransferError> {
        Ok(tokio::fs::read(&self.path).await?)
    }

    pub async fn size(&self) -> Result<u64, TransferError> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }

    /// Deletes the file.
    pub async fn release(mut self) {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "staged file released"),
            Err(e) => log_release_error(&self.path, e),
        }
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "staged file released on drop"),
            Err(e) => log_release_error(&self.path, e),
        }
    }
}

fn log_release_error(path: &Path, err: std::io::Error) {
    if err.kind() != std::io::ErrorKind::NotFound {
        warn!(path = %path.display(), error = %err, "failed to release staged file");
    }
}
