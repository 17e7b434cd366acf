use serde::{Deserialize, Serialize};

use crate::types::{DirectoryEntry, FileEntry, UploadedFile};

/// `POST /api/upload` success body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub files: Vec<UploadedFile>,
}

impl UploadResponse {
    pub fn new(files: Vec<UploadedFile>) -> Self {
        Self {
            success: true,
            message: format!("{} file(s) uploaded successfully", files.len()),
            files,
        }
    }
}

/// `GET /api/files` success body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListFilesResponse {
    pub success: bool,
    pub files: Vec<FileEntry>,
    pub current_folder: String,
}

/// `GET /api/directories` success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoriesResponse {
    pub success: bool,
    pub directories: Vec<DirectoryEntry>,
}

/// `DELETE /api/delete/:filename` success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
    pub message: String,
}

/// `POST /api/download-multiple` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadManyRequest {
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub folder: Option<String>,
}

/// Error body shared by every endpoint.
///
/// `details` carries the underlying backend message for server-side
/// failures. `files` is only present when an upload batch aborted after
/// some files had already been persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<UploadedFile>>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
            files: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_files(mut self, files: Vec<UploadedFile>) -> Self {
        self.files = Some(files);
        self
    }
}
