//! Local staging of bytes in transit, with guaranteed release.
//!
//! Every byte relayed between the HTTP boundary and the remote tree is
//! buffered in a uniquely named file under one staging directory. A
//! [`StagedFile`] deletes its file exactly once: on explicit
//! [`StagedFile::release`], or when dropped on any other exit path
//! (error, early return, aborted response).

mod staging;
mod stream;
mod validation;

pub use staging::{StagePurpose, StagedFile, StagingArea};
pub use stream::StagedStream;
pub use validation::{validate_file_name, validate_folder};

/// Read buffer used when streaming a staged file (64 KiB).
pub const STREAM_BUFFER_SIZE: usize = 64 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid file name: {0}")]
    InvalidName(String),
}
