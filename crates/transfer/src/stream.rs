//! Streaming a staged file to a client.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio_util::io::ReaderStream;

use crate::{STREAM_BUFFER_SIZE, StagedFile, TransferError};

/// Byte stream over a staged file that owns it.
///
/// The staged file is released when the stream is dropped, which happens
/// once the response body has been fully sent or the client went away.
#[derive(Debug)]
pub struct StagedStream {
    inner: ReaderStream<tokio::fs::File>,
    len: u64,
    _staged: StagedFile,
}

impl StagedStream {
    /// Opens `staged` for reading and takes ownership of it.
    pub async fn open(staged: StagedFile) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(staged.path()).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            inner: ReaderStream::with_capacity(file, STREAM_BUFFER_SIZE),
            len,
            _staged: staged,
        })
    }

    /// Total number of bytes the stream will yield.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Stream for StagedStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}
