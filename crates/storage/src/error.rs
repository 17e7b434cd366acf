//! Storage error types.

/// Errors produced by storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("write rejected: {0}")]
    Write(String),
}

impl StorageError {
    /// Maps a local I/O error raised while touching `path`.
    ///
    /// `NotFound` keeps its meaning; everything else becomes the variant
    /// built by `other`.
    pub(crate) fn from_io(
        err: std::io::Error,
        path: &str,
        other: fn(String) -> StorageError,
    ) -> StorageError {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
            _ => other(format!("{path}: {err}")),
        }
    }
}
