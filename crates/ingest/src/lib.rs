//! Ingest naming convention.
//!
//! Uploaded files are routed by name: the text after the last `-` and
//! before the following `.` names the destination folder, so
//! `feature-file-4k_hfr-304546.xml` lands in `304546/`. A name without
//! `-` is a single segment and follows the same rule
//! (`report.xml` → `report`).

use std::collections::HashSet;

use nasrelay_storage::{PathResolver, RemoteSession, StorageError};
use tracing::info;

/// Derives the destination folder from a file name.
///
/// Returns an empty string when the last segment starts with `.`
/// (e.g. `name-.xml`); callers decide whether that is acceptable.
pub fn folder_of(filename: &str) -> &str {
    let last = filename.rsplit('-').next().unwrap_or(filename);
    last.split('.').next().unwrap_or(last)
}

/// Outcome of [`IngestRouter::ensure_folder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderStatus {
    /// The folder was already on the remote.
    Existing,
    /// The folder was created by this call.
    Created,
    /// The folder was already ensured earlier in the same batch.
    Cached,
}

/// Routes the files of one batch into their ingest folders.
///
/// Remembers which folders it has already ensured, so a batch touching
/// K distinct folders probes and creates each of them once.
#[derive(Debug)]
pub struct IngestRouter<'a> {
    resolver: &'a PathResolver,
    ensured: HashSet<String>,
}

impl<'a> IngestRouter<'a> {
    pub fn new(resolver: &'a PathResolver) -> Self {
        Self {
            resolver,
            ensured: HashSet::new(),
        }
    }

    /// Remote path of `filename` inside its ingest folder.
    pub fn destination(&self, filename: &str) -> String {
        self.resolver.file(Some(folder_of(filename)), filename)
    }

    /// Makes sure `folder` exists under the base path.
    ///
    /// Probes first and creates only on absence. A creation that loses a
    /// race against another creator still succeeds, because
    /// [`RemoteSession::ensure_directory`] treats an existing directory as
    /// success.
    pub async fn ensure_folder(
        &mut self,
        session: &dyn RemoteSession,
        folder: &str,
    ) -> Result<FolderStatus, StorageError> {
        if self.ensured.contains(folder) {
            return Ok(FolderStatus::Cached);
        }

        let path = self.resolver.folder(Some(folder));
        let status = if session.exists(&path).await? {
            info!(path = %path, "using existing folder");
            FolderStatus::Existing
        } else {
            session.ensure_directory(&path).await?;
            info!(path = %path, "created new folder");
            FolderStatus::Created
        };

        self.ensured.insert(folder.to_string());
        Ok(status)
    }
}
