//! HTTP handlers.

use axum::Json;
use axum::body::Body;
use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use nasrelay_gateway::Download;
use nasrelay_protocol::{
    DeleteResponse, DirectoriesResponse, DownloadManyRequest, ListFilesResponse, UPLOAD_FIELD,
    UploadResponse,
};
use nasrelay_transfer::{StagePurpose, StagedFile};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::app::AppState;
use crate::response::ApiError;

/// Characters kept verbatim in an RFC 5987 `filename*` value.
const FILENAME_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

#[derive(Debug, Default, Deserialize)]
pub struct FolderQuery {
    #[serde(default)]
    pub folder: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub search: Option<String>,
}

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// `POST /api/upload`: multipart field `files`, one part per file.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>, ApiError> {
    const FAILED: &str = "Failed to upload files";
    let mut multipart = multipart.map_err(|rejection| {
        tracing::debug!(error = %rejection.body_text(), "upload is not a multipart body");
        ApiError::bad_request("No files uploaded")
    })?;
    let staging = state.gateway.staging();
    let mut files: Vec<StagedFile> = Vec::new();

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        // Browsers send an empty-named part for an untouched file input.
        let Some(filename) = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
        else {
            continue;
        };
        if files.len() >= state.max_upload_files {
            return Err(ApiError::bad_request(format!(
                "Too many files (at most {} per upload)",
                state.max_upload_files
            )));
        }

        let staged = staging
            .acquire(StagePurpose::UploadSource, &filename)
            .await
            .map_err(|e| ApiError::new(FAILED, e.into()))?;
        let mut writer = staged
            .writer()
            .await
            .map_err(|e| ApiError::new(FAILED, e.into()))?;

        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
        {
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| ApiError::new(FAILED, nasrelay_transfer::TransferError::Io(e).into()))?;
        }
        writer
            .flush()
            .await
            .map_err(|e| ApiError::new(FAILED, nasrelay_transfer::TransferError::Io(e).into()))?;

        files.push(staged);
    }

    if files.is_empty() {
        return Err(ApiError::bad_request("No files uploaded"));
    }

    let uploaded = state
        .gateway
        .upload(files)
        .await
        .map_err(|e| ApiError::new(FAILED, e))?;
    Ok(Json(UploadResponse::new(uploaded)))
}

/// `GET /api/files?folder=`
pub async fn list_files(
    State(state): State<AppState>,
    Query(query): Query<FolderQuery>,
) -> Result<Json<ListFilesResponse>, ApiError> {
    let listing = state
        .gateway
        .list(query.folder.as_deref())
        .await
        .map_err(|e| ApiError::new("Failed to list files", e))?;
    Ok(Json(listing))
}

/// `GET /api/directories?search=`
pub async fn list_directories(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<DirectoriesResponse>, ApiError> {
    let directories = state
        .gateway
        .directories(query.search.as_deref())
        .await
        .map_err(|e| ApiError::new("Failed to list directories", e))?;
    Ok(Json(DirectoriesResponse {
        success: true,
        directories,
    }))
}

/// `GET /api/download/:filename?folder=`
pub async fn download(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<FolderQuery>,
) -> Result<Response, ApiError> {
    let download = state
        .gateway
        .download(&filename, query.folder.as_deref())
        .await
        .map_err(|e| ApiError::new("Failed to download file", e))?;
    Ok(attachment(download, "application/octet-stream"))
}

/// `POST /api/download-multiple`
pub async fn download_multiple(
    State(state): State<AppState>,
    request: Result<Json<DownloadManyRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = request.map_err(|rejection| {
        tracing::debug!(error = %rejection.body_text(), "unreadable download request");
        ApiError::bad_request("No files specified")
    })?;
    let download = state
        .gateway
        .download_many(&request.files, request.folder.as_deref())
        .await
        .map_err(|e| ApiError::new("Failed to download files", e))?;
    Ok(attachment(download, "application/zip"))
}

/// `DELETE /api/delete/:filename?folder=`
pub async fn delete_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
    Query(query): Query<FolderQuery>,
) -> Result<Json<DeleteResponse>, ApiError> {
    state
        .gateway
        .delete(&filename, query.folder.as_deref())
        .await
        .map_err(|e| ApiError::new("Failed to delete file", e))?;
    Ok(Json(DeleteResponse {
        success: true,
        message: format!("File {filename} deleted successfully"),
    }))
}

/// Streams a staged download. The staged file goes away with the body.
fn attachment(download: Download, content_type: &'static str) -> Response {
    let len = download.stream.len();
    let disposition = content_disposition(&download.filename);

    let mut response = Body::from_stream(download.stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&disposition)
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );
    response
}

/// `attachment` disposition keeping the exact name in `filename*` and an
/// ASCII approximation in `filename`.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        utf8_percent_encode(filename, FILENAME_ESCAPE)
    )
}
