use std::sync::Arc;

use nasrelay_archive::{ArchiveAssembler, ArchiveEntry};
use nasrelay_ingest::{IngestRouter, folder_of};
use nasrelay_protocol::{
    ARCHIVE_FILE_NAME, DirectoryEntry, EntryKind, FileEntry, ListFilesResponse, UploadedFile,
};
use nasrelay_storage::{PathResolver, StorageBackend};
use nasrelay_transfer::{
    StagePurpose, StagedFile, StagedStream, StagingArea, validate_file_name, validate_folder,
};
use tracing::{info, warn};

use crate::session::SessionScope;
use crate::{GatewayError, GatewaySettings};

/// A staged file ready to be sent to a client.
#[derive(Debug)]
pub struct Download {
    /// Name the client should save the bytes under.
    pub filename: String,
    pub stream: StagedStream,
}

/// Runs each client operation inside its own remote session.
pub struct TransferGateway {
    backend: Arc<dyn StorageBackend>,
    settings: Arc<GatewaySettings>,
    staging: Arc<StagingArea>,
    resolver: PathResolver,
}

impl TransferGateway {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        settings: Arc<GatewaySettings>,
        staging: Arc<StagingArea>,
    ) -> Self {
        let resolver = PathResolver::new(&settings.base_path, backend.separator());
        Self {
            backend,
            settings,
            staging,
            resolver,
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    async fn open(&self, operation: &'static str) -> Result<SessionScope, GatewayError> {
        SessionScope::open(self.backend.as_ref(), &self.settings.credentials, operation).await
    }

    /// Persists uploaded files into their ingest folders.
    ///
    /// Every name is checked before the session is opened. Files are then
    /// written one at a time; the first failure stops the batch and is
    /// reported with the files already persisted. Every input file is
    /// released whatever the outcome.
    pub async fn upload(&self, files: Vec<StagedFile>) -> Result<Vec<UploadedFile>, GatewayError> {
        if files.is_empty() {
            return Err(GatewayError::Validation("No files uploaded".into()));
        }
        if let Err(e) = check_upload_names(&files) {
            release_all(files).await;
            return Err(e);
        }

        let mut scope = match self.open("upload").await {
            Ok(scope) => scope,
            Err(e) => {
                release_all(files).await;
                return Err(e);
            }
        };

        let mut router = IngestRouter::new(&self.resolver);
        let mut uploaded = Vec::with_capacity(files.len());
        let mut pending = files.into_iter();
        let mut failure = None;

        for file in pending.by_ref() {
            let filename = file.logical_name().to_string();
            let folder = folder_of(&filename).to_string();

            let result = async {
                let session = scope.session()?;
                router.ensure_folder(session, &folder).await?;
                let data = file.read().await?;
                let destination = router.destination(&filename);
                session.write_file(&destination, data).await?;
                Ok::<_, GatewayError>(destination)
            }
            .await;
            file.release().await;

            match result {
                Ok(destination) => {
                    info!(file = %filename, path = %destination, "file uploaded");
                    uploaded.push(UploadedFile { filename, folder });
                }
                Err(e) => {
                    warn!(
                        file = %filename,
                        uploaded = uploaded.len(),
                        error = %e,
                        "upload batch aborted"
                    );
                    failure = Some((filename, e));
                    break;
                }
            }
        }

        release_all(pending.collect()).await;
        scope.close().await;

        match failure {
            None => Ok(uploaded),
            Some((failed, source)) => Err(GatewayError::UploadAborted {
                uploaded,
                failed,
                source: Box::new(source),
            }),
        }
    }

    /// Lists a folder under the base path.
    ///
    /// An absent, empty or root folder lists the base path itself and is
    /// labelled `/`.
    pub async fn list(&self, folder: Option<&str>) -> Result<ListFilesResponse, GatewayError> {
        let folder = folder.filter(|f| !f.is_empty());
        if let Some(folder) = folder {
            validate_folder(folder)?;
        }
        let path = self.resolver.folder(folder);

        let mut scope = self.open("list").await?;
        let result = match scope.session() {
            Ok(session) => session.list(&path).await.map_err(GatewayError::from),
            Err(e) => Err(e),
        };
        scope.close().await;

        let files = result?
            .into_iter()
            .filter(|entry| !entry.is_pseudo())
            .map(|entry| FileEntry {
                name: entry.name,
                size: entry.size,
                kind: entry.kind,
                modified_at: entry.modified_at,
            })
            .collect();

        Ok(ListFilesResponse {
            success: true,
            files,
            current_folder: folder.unwrap_or("/").to_string(),
        })
    }

    /// Lists the directories directly under the base path, sorted by name.
    ///
    /// With `search`, keeps only names containing it (case-insensitive).
    pub async fn directories(
        &self,
        search: Option<&str>,
    ) -> Result<Vec<DirectoryEntry>, GatewayError> {
        let path = self.resolver.folder(None);

        let mut scope = self.open("directories").await?;
        let result = match scope.session() {
            Ok(session) => session.list(&path).await.map_err(GatewayError::from),
            Err(e) => Err(e),
        };
        scope.close().await;

        let needle = search
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut directories: Vec<DirectoryEntry> = result?
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::Directory && !entry.is_pseudo())
            .filter(|entry| match &needle {
                Some(needle) => entry.name.to_lowercase().contains(needle),
                None => true,
            })
            .map(|entry| DirectoryEntry { name: entry.name })
            .collect();
        directories.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(directories)
    }

    /// Stages one remote file for download.
    ///
    /// The session is closed before the caller starts streaming; the staged
    /// copy is released when the returned stream is dropped.
    pub async fn download(
        &self,
        filename: &str,
        folder: Option<&str>,
    ) -> Result<Download, GatewayError> {
        validate_file_name(filename)?;
        if let Some(folder) = folder {
            validate_folder(folder)?;
        }
        let path = self.resolver.file(folder, filename);

        let mut scope = self.open("download").await?;
        let result = match scope.session() {
            Ok(session) => session.read_file(&path).await.map_err(GatewayError::from),
            Err(e) => Err(e),
        };
        scope.close().await;
        let data = result?;

        let staged = self
            .staging
            .stage_bytes(StagePurpose::DownloadStaged, filename, &data)
            .await?;
        let stream = StagedStream::open(staged).await?;

        info!(file = %filename, path = %path, size = stream.len(), "download staged");
        Ok(Download {
            filename: filename.to_string(),
            stream,
        })
    }

    /// Packs several files of one folder into a single archive.
    ///
    /// An empty list is rejected before any remote I/O. If any file cannot
    /// be downloaded the whole request fails and no archive is produced.
    pub async fn download_many(
        &self,
        files: &[String],
        folder: Option<&str>,
    ) -> Result<Download, GatewayError> {
        if files.is_empty() {
            return Err(GatewayError::Validation("No files specified".into()));
        }
        for file in files {
            validate_file_name(file)?;
        }
        if let Some(folder) = folder {
            validate_folder(folder)?;
        }

        let entries: Vec<ArchiveEntry> = files
            .iter()
            .map(|name| ArchiveEntry::new(self.resolver.file(folder, name), name.as_str()))
            .collect();

        let mut scope = self.open("download_many").await?;
        let result = match scope.session() {
            Ok(session) => ArchiveAssembler::new(&self.staging, ARCHIVE_FILE_NAME)
                .assemble(session, &entries)
                .await
                .map_err(GatewayError::from),
            Err(e) => Err(e),
        };
        scope.close().await;

        let stream = StagedStream::open(result?).await?;
        Ok(Download {
            filename: ARCHIVE_FILE_NAME.to_string(),
            stream,
        })
    }

    /// Deletes one remote file.
    pub async fn delete(&self, filename: &str, folder: Option<&str>) -> Result<(), GatewayError> {
        validate_file_name(filename)?;
        if let Some(folder) = folder {
            validate_folder(folder)?;
        }
        let path = self.resolver.file(folder, filename);

        let mut scope = self.open("delete").await?;
        let result = match scope.session() {
            Ok(session) => session.delete(&path).await.map_err(GatewayError::from),
            Err(e) => Err(e),
        };
        scope.close().await;
        result?;

        info!(file = %filename, path = %path, "file deleted");
        Ok(())
    }
}

fn check_upload_names(files: &[StagedFile]) -> Result<(), GatewayError> {
    for file in files {
        let name = file.logical_name();
        validate_file_name(name)?;
        if folder_of(name).is_empty() {
            return Err(GatewayError::Validation(format!(
                "cannot derive a destination folder from {name}"
            )));
        }
    }
    Ok(())
}

async fn release_all(files: Vec<StagedFile>) {
    for file in files {
        file.release().await;
    }
}

#[cfg(test)]
mod tests {
    use nasrelay_storage::{Credentials, MemoryBackend, StorageError};

    use super::*;
    use crate::ErrorKind;

    struct Fixture {
        _tmp: tempfile::TempDir,
        backend: MemoryBackend,
        gateway: TransferGateway,
    }

    impl Fixture {
        async fn new() -> Self {
            let tmp = tempfile::tempdir().unwrap();
            let staging = StagingArea::open(tmp.path().join("staging")).await.unwrap();
            let backend = MemoryBackend::new().with_directory("ingest");
            let settings = GatewaySettings {
                credentials: Credentials::default(),
                base_path: "/ingest".into(),
            };
            let gateway = TransferGateway::new(
                Arc::new(backend.clone()),
                Arc::new(settings),
                Arc::new(staging),
            );
            Self {
                _tmp: tmp,
                backend,
                gateway,
            }
        }

        async fn staged(&self, name: &str, data: &[u8]) -> StagedFile {
            self.gateway
                .staging()
                .stage_bytes(StagePurpose::UploadSource, name, data)
                .await
                .unwrap()
        }

        fn staged_count(&self) -> usize {
            std::fs::read_dir(self.gateway.staging().root()).unwrap().count()
        }
    }

    #[tokio::test]
    async fn upload_creates_each_folder_once() {
        let fx = Fixture::new().await;
        let files = vec![
            fx.staged("a-1.xml", b"a").await,
            fx.staged("b-1.xml", b"b").await,
            fx.staged("c-2.xml", b"c").await,
            fx.staged("d-2.xml", b"d").await,
        ];

        let uploaded = fx.gateway.upload(files).await.unwrap();

        assert_eq!(uploaded.len(), 4);
        assert_eq!(uploaded[2].folder, "2");
        assert_eq!(
            fx.backend.created_directories(),
            vec!["ingest/1".to_string(), "ingest/2".to_string()]
        );
        assert_eq!(fx.backend.file("ingest/2/d-2.xml"), Some(b"d".to_vec()));
        assert_eq!(fx.staged_count(), 0);
        assert_eq!(fx.backend.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn upload_stops_at_first_failure() {
        let fx = Fixture::new().await;
        fx.backend.fail_writes_of("ingest/1/b-1.xml");
        let files = vec![
            fx.staged("a-1.xml", b"a").await,
            fx.staged("b-1.xml", b"b").await,
            fx.staged("c-2.xml", b"c").await,
        ];

        let err = fx.gateway.upload(files).await.unwrap_err();

        match &err {
            GatewayError::UploadAborted {
                uploaded, failed, ..
            } => {
                assert_eq!(uploaded.len(), 1);
                assert_eq!(uploaded[0].filename, "a-1.xml");
                assert_eq!(failed, "b-1.xml");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.kind(), ErrorKind::Write);
        assert!(fx.backend.file("ingest/2/c-2.xml").is_none());
        assert!(!fx.backend.has_directory("ingest/2"));
        assert_eq!(fx.staged_count(), 0);
        assert_eq!(fx.backend.sessions_closed(), fx.backend.sessions_opened());
    }

    #[tokio::test]
    async fn upload_rejects_bad_names_before_connecting() {
        let fx = Fixture::new().await;
        let files = vec![
            fx.staged("a-1.xml", b"a").await,
            fx.staged("name-.xml", b"x").await,
        ];

        let err = fx.gateway.upload(files).await.unwrap_err();

        assert_eq!(err.status(), 400);
        assert_eq!(fx.backend.sessions_opened(), 0);
        assert_eq!(fx.staged_count(), 0);
    }

    #[tokio::test]
    async fn upload_connection_failure_releases_inputs() {
        let fx = Fixture::new().await;
        fx.backend.fail_connections(true);
        let files = vec![fx.staged("a-1.xml", b"a").await];

        let err = fx.gateway.upload(files).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(fx.staged_count(), 0);
    }

    #[tokio::test]
    async fn list_filters_pseudo_entries_and_labels_root() {
        let fx = Fixture::new().await;
        fx.backend.insert_file("ingest/top.xml", b"t");

        let listing = fx.gateway.list(None).await.unwrap();
        assert_eq!(listing.current_folder, "/");
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].name, "top.xml");
        assert_eq!(listing.files[0].size, Some(1));

        let listing = fx.gateway.list(Some("")).await.unwrap();
        assert_eq!(listing.current_folder, "/");
    }

    #[tokio::test]
    async fn list_missing_folder_is_not_found() {
        let fx = Fixture::new().await;
        let err = fx.gateway.list(Some("nope")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(fx.backend.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn list_rejects_traversal() {
        let fx = Fixture::new().await;
        let err = fx.gateway.list(Some("../etc")).await.unwrap_err();
        assert_eq!(err.status(), 400);
        assert_eq!(fx.backend.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn directories_are_sorted_and_searchable() {
        let fx = Fixture::new().await;
        let backend = fx
            .backend
            .clone()
            .with_directory("ingest/304546")
            .with_directory("ingest/303045")
            .with_directory("ingest/archive");
        backend.insert_file("ingest/loose.xml", b"x");

        let all = fx.gateway.directories(None).await.unwrap();
        let names: Vec<_> = all.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["303045", "304546", "archive"]);

        let found = fx.gateway.directories(Some("ARCH")).await.unwrap();
        assert_eq!(found, vec![DirectoryEntry { name: "archive".into() }]);
    }

    #[tokio::test]
    async fn unclassified_entries_are_not_directories() {
        let fx = Fixture::new().await;
        let _ = fx.backend.clone().with_directory("ingest/1");
        fx.backend.unclassified_listings(true);

        let listing = fx.gateway.list(None).await.unwrap();
        assert_eq!(listing.files[0].kind, EntryKind::Unknown);
        assert!(fx.gateway.directories(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn download_many_rejects_empty_list_without_io() {
        let fx = Fixture::new().await;
        let err = fx.gateway.download_many(&[], Some("1")).await.unwrap_err();
        assert_eq!(err.status(), 400);
        assert_eq!(fx.backend.sessions_opened(), 0);
        assert_eq!(fx.backend.remote_calls(), 0);
    }

    #[tokio::test]
    async fn download_missing_file_is_classified() {
        let fx = Fixture::new().await;
        let err = fx.gateway.download("gone.xml", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(fx.staged_count(), 0);
        assert_eq!(fx.backend.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn delete_missing_file_is_not_found() {
        let fx = Fixture::new().await;
        let err = fx.gateway.delete("gone.xml", Some("1")).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Storage(StorageError::NotFound(_))
        ));
        assert_eq!(err.status(), 500);
    }
}
