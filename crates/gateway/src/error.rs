//! Gateway error types and their classification.

use nasrelay_archive::ArchiveError;
use nasrelay_protocol::UploadedFile;
use nasrelay_storage::StorageError;
use nasrelay_transfer::TransferError;

/// Failure classes reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A session could not be established.
    Connection,
    /// Uncategorized backend failure.
    Protocol,
    /// Remote path absent.
    NotFound,
    /// Remote write or create rejected.
    Write,
    /// Malformed or missing client input.
    Validation,
    /// Staging disk failure.
    LocalIo,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Protocol => "ProtocolError",
            ErrorKind::NotFound => "NotFoundError",
            ErrorKind::Write => "WriteError",
            ErrorKind::Validation => "ValidationError",
            ErrorKind::LocalIo => "LocalIOError",
        }
    }

    /// HTTP status for this class: client input errors are 400, the rest 500.
    pub fn status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            _ => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// An upload batch stopped at `failed`; `uploaded` were already persisted.
    #[error("upload aborted at {failed}: {source}")]
    UploadAborted {
        uploaded: Vec<UploadedFile>,
        failed: String,
        #[source]
        source: Box<GatewayError>,
    },
}

impl GatewayError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Validation(_) => ErrorKind::Validation,
            GatewayError::Storage(e) => storage_kind(e),
            GatewayError::Transfer(TransferError::Io(_)) => ErrorKind::LocalIo,
            GatewayError::Transfer(_) => ErrorKind::Validation,
            GatewayError::Archive(ArchiveError::Download { source, .. }) => storage_kind(source),
            GatewayError::Archive(_) => ErrorKind::LocalIo,
            GatewayError::UploadAborted { source, .. } => source.kind(),
        }
    }

    pub fn status(&self) -> u16 {
        self.kind().status()
    }
}

fn storage_kind(err: &StorageError) -> ErrorKind {
    match err {
        StorageError::Connection(_) => ErrorKind::Connection,
        StorageError::Protocol(_) => ErrorKind::Protocol,
        StorageError::NotFound(_) => ErrorKind::NotFound,
        StorageError::Write(_) => ErrorKind::Write,
    }
}
