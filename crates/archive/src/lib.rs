//! Multi-file download as one zip archive.
//!
//! Every requested remote file is downloaded into the staging area first,
//! one after the other. Only when all of them are local is the archive
//! built, so a failed batch produces an error and never a truncated
//! archive. The archive itself is a staged file the caller streams and
//! then releases.

use std::io::Write;
use std::path::PathBuf;

use nasrelay_storage::{RemoteSession, StorageError};
use nasrelay_transfer::{StagePurpose, StagedFile, StagingArea, TransferError};
use tracing::{debug, info, warn};
use zip::CompressionMethod;
use zip::result::ZipError;
use zip::write::FileOptions;

/// One file to put in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Backend-native path to download.
    pub remote_path: String,
    /// Name of the entry inside the archive.
    pub archive_name: String,
}

impl ArchiveEntry {
    pub fn new(remote_path: impl Into<String>, archive_name: impl Into<String>) -> Self {
        Self {
            remote_path: remote_path.into(),
            archive_name: archive_name.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The batch was aborted because one member could not be downloaded.
    #[error("failed to download {name} (entry {index}): {source}")]
    Download {
        index: usize,
        name: String,
        #[source]
        source: StorageError,
    },

    #[error("staging error: {0}")]
    Staging(#[from] TransferError),

    #[error("zip error: {0}")]
    Zip(#[from] ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Builds archives in a staging area.
#[derive(Debug)]
pub struct ArchiveAssembler<'a> {
    staging: &'a StagingArea,
    archive_name: String,
}

impl<'a> ArchiveAssembler<'a> {
    /// `archive_name` is the logical name of the produced archive.
    pub fn new(staging: &'a StagingArea, archive_name: impl Into<String>) -> Self {
        Self {
            staging,
            archive_name: archive_name.into(),
        }
    }

    /// Downloads `entries` through `session` and packs them into one zip.
    ///
    /// Entries are written in request order under their `archive_name`;
    /// duplicate names produce duplicate entries. Member files are
    /// released before returning, on success and on failure.
    pub async fn assemble(
        &self,
        session: &dyn RemoteSession,
        entries: &[ArchiveEntry],
    ) -> Result<StagedFile, ArchiveError> {
        let mut members = Vec::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            let data = match session.read_file(&entry.remote_path).await {
                Ok(data) => data,
                Err(source) => {
                    warn!(
                        index,
                        path = %entry.remote_path,
                        error = %source,
                        staged = members.len(),
                        "archive batch aborted"
                    );
                    release_all(members).await;
                    return Err(ArchiveError::Download {
                        index,
                        name: entry.archive_name.clone(),
                        source,
                    });
                }
            };

            match self
                .staging
                .stage_bytes(StagePurpose::ArchiveMember, &entry.archive_name, &data)
                .await
            {
                Ok(staged) => members.push(staged),
                Err(e) => {
                    release_all(members).await;
                    return Err(e.into());
                }
            }
            debug!(index, name = %entry.archive_name, size = data.len(), "archive member staged");
        }

        let result = self.pack(&members).await;
        release_all(members).await;
        let archive = result?;

        info!(
            entries = entries.len(),
            path = %archive.path().display(),
            "archive assembled"
        );
        Ok(archive)
    }

    async fn pack(&self, members: &[StagedFile]) -> Result<StagedFile, ArchiveError> {
        let archive = self
            .staging
            .acquire(StagePurpose::DownloadStaged, &self.archive_name)
            .await?;

        let sources: Vec<(PathBuf, String)> = members
            .iter()
            .map(|m| (m.path().to_path_buf(), m.logical_name().to_string()))
            .collect();
        let target = archive.path().to_path_buf();

        // On error `archive` is dropped here and removes the partial file.
        tokio::task::spawn_blocking(move || write_zip(&target, &sources)).await??;
        Ok(archive)
    }
}

fn write_zip(target: &std::path::Path, sources: &[(PathBuf, String)]) -> Result<(), ArchiveError> {
    let file = std::fs::File::create(target)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (path, name) in sources {
        zip.start_file(name.as_str(), options)?;
        let mut member = std::fs::File::open(path)?;
        std::io::copy(&mut member, &mut zip)?;
    }

    let mut file = zip.finish()?;
    file.flush()?;
    Ok(())
}

async fn release_all(members: Vec<StagedFile>) {
    for member in members {
        member.release().await;
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use nasrelay_storage::{Credentials, MemoryBackend, StorageBackend};

    use super::*;

    fn read_archive(path: &std::path::Path) -> Vec<(String, Vec<u8>)> {
        let file = std::fs::File::open(path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        (0..archive.len())
            .map(|i| {
                let mut entry = archive.by_index(i).unwrap();
                let mut data = Vec::new();
                entry.read_to_end(&mut data).unwrap();
                (entry.name().to_string(), data)
            })
            .collect()
    }

    fn staged_files(root: &std::path::Path) -> usize {
        std::fs::read_dir(root).unwrap().count()
    }

    #[tokio::test]
    async fn packs_entries_under_requested_names() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = StagingArea::open(tmp.path()).await.unwrap();
        let backend = MemoryBackend::new().with_directory("base/1");
        backend.insert_file("base/1/a-1.xml", b"<a/>");
        backend.insert_file("base/1/b-1.xml", b"<b/>");
        let session = backend.open(&Credentials::default()).await.unwrap();

        let entries = vec![
            ArchiveEntry::new("base/1/a-1.xml", "a-1.xml"),
            ArchiveEntry::new("base/1/b-1.xml", "b-1.xml"),
        ];
        let archive = ArchiveAssembler::new(&staging, "files.zip")
            .assemble(session.as_ref(), &entries)
            .await
            .unwrap();

        assert_eq!(archive.logical_name(), "files.zip");
        assert_eq!(
            read_archive(archive.path()),
            vec![
                ("a-1.xml".to_string(), b"<a/>".to_vec()),
                ("b-1.xml".to_string(), b"<b/>".to_vec()),
            ]
        );
        assert_eq!(staged_files(tmp.path()), 1);

        archive.release().await;
        assert_eq!(staged_files(tmp.path()), 0);
    }

    #[tokio::test]
    async fn failure_mid_batch_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = StagingArea::open(tmp.path()).await.unwrap();
        let backend = MemoryBackend::new().with_directory("base");
        backend.insert_file("base/a.xml", b"a");
        backend.insert_file("base/c.xml", b"c");
        let session = backend.open(&Credentials::default()).await.unwrap();

        let entries = vec![
            ArchiveEntry::new("base/a.xml", "a.xml"),
            ArchiveEntry::new("base/b.xml", "b.xml"),
            ArchiveEntry::new("base/c.xml", "c.xml"),
        ];
        let err = ArchiveAssembler::new(&staging, "files.zip")
            .assemble(session.as_ref(), &entries)
            .await
            .unwrap_err();

        match err {
            ArchiveError::Download {
                index,
                name,
                source,
            } => {
                assert_eq!(index, 1);
                assert_eq!(name, "b.xml");
                assert!(matches!(source, StorageError::NotFound(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(staged_files(tmp.path()), 0);
        // The third file is never requested.
        assert_eq!(backend.remote_calls(), 2);
    }

    #[tokio::test]
    async fn duplicate_names_are_written_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = StagingArea::open(tmp.path()).await.unwrap();
        let backend = MemoryBackend::new().with_directory("1").with_directory("2");
        backend.insert_file("1/report.xml", b"one");
        backend.insert_file("2/report.xml", b"two");
        let session = backend.open(&Credentials::default()).await.unwrap();

        let entries = vec![
            ArchiveEntry::new("1/report.xml", "report.xml"),
            ArchiveEntry::new("2/report.xml", "report.xml"),
        ];
        let archive = ArchiveAssembler::new(&staging, "files.zip")
            .assemble(session.as_ref(), &entries)
            .await
            .unwrap();

        let contents = read_archive(archive.path());
        assert_eq!(contents.len(), 2);
        assert!(contents.iter().all(|(name, _)| name == "report.xml"));
    }

    #[tokio::test]
    async fn empty_batch_yields_empty_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let staging = StagingArea::open(tmp.path()).await.unwrap();
        let backend = MemoryBackend::new();
        let session = backend.open(&Credentials::default()).await.unwrap();

        let archive = ArchiveAssembler::new(&staging, "files.zip")
            .assemble(session.as_ref(), &[])
            .await
            .unwrap();
        assert!(read_archive(archive.path()).is_empty());
    }
}
