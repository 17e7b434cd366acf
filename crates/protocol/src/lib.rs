//! JSON wire types for the nasrelay HTTP surface.
//!
//! Field names match what the browser front-end already consumes
//! (`type`, `modifiedAt`, `currentFolder`).

pub mod messages;
pub mod types;

pub use messages::{
    DeleteResponse, DirectoriesResponse, DownloadManyRequest, ErrorResponse, ListFilesResponse,
    UploadResponse,
};
pub use types::{DirectoryEntry, EntryKind, FileEntry, UploadedFile};

/// Name of the archive returned by multi-file downloads.
pub const ARCHIVE_FILE_NAME: &str = "files.zip";

/// Multipart field carrying uploaded files.
pub const UPLOAD_FIELD: &str = "files";
