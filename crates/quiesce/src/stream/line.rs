//! Line-oriented reader over any `AsyncRead`

use crate::sync::CancellationToken;
use futures::future::{self, Either};
use futures::io::{AsyncBufReadExt, AsyncRead, BufReader};
use quiesce_core::{StreamError, LINE_LENGTH_BYTES_MAX};
use std::io;

/// Reads `\n`-terminated lines (a trailing `\r` is stripped)
///
/// Bytes of a line that was interrupted by cancellation are kept and
/// returned by the next call.
#[derive(Debug)]
pub struct LineReader<R> {
    inner: BufReader<R>,
    partial: Vec<u8>,
    max_line_bytes: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    /// Wrap a reader
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            partial: Vec::new(),
            max_line_bytes: LINE_LENGTH_BYTES_MAX,
        }
    }

    /// Set the longest accepted line
    pub fn with_max_line_bytes(mut self, limit: usize) -> Self {
        assert!(limit > 0, "line limit must be positive");
        self.max_line_bytes = limit;
        self
    }

    /// Read the next line
    ///
    /// Returns `StreamError::EndOfStream` once the stream is exhausted; a
    /// final line without a terminator is returned before that. A line over
    /// the limit fails with `StreamError::LineTooLong` as soon as the limit
    /// is crossed, without waiting for its terminator; the bytes of it read
    /// so far are discarded.
    pub async fn next_line(&mut self) -> Result<String, StreamError> {
        loop {
            let available = self.inner.fill_buf().await.map_err(stream_error)?;
            if available.is_empty() {
                if self.partial.is_empty() {
                    return Err(StreamError::EndOfStream);
                }
                break;
            }

            let (chunk_len, terminated) = match available.iter().position(|b| *b == b'\n') {
                Some(at) => (at + 1, true),
                None => (available.len(), false),
            };

            // A trailing '\r' may still turn out to be part of a CRLF
            let content = if terminated { chunk_len - 1 } else { chunk_len };
            let pending_cr = if content > 0 {
                available[content - 1] == b'\r'
            } else {
                self.partial.last() == Some(&b'\r')
            };
            let line_len = self.partial.len() + content - usize::from(pending_cr);
            if line_len > self.max_line_bytes {
                self.partial.clear();
                self.inner.consume_unpin(chunk_len);
                return Err(StreamError::LineTooLong {
                    limit: self.max_line_bytes,
                });
            }

            self.partial.extend_from_slice(&available[..chunk_len]);
            self.inner.consume_unpin(chunk_len);
            if terminated {
                break;
            }
        }

        let mut line = std::mem::take(&mut self.partial);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }

        String::from_utf8(line)
            .map_err(|e| StreamError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
    }

    /// Read the next line, giving up with `StreamError::Cancelled` as soon
    /// as `token` is cancelled
    pub async fn next_line_or_cancel(
        &mut self,
        token: &CancellationToken,
    ) -> Result<String, StreamError> {
        if token.is_cancelled() {
            return Err(StreamError::Cancelled);
        }

        let cancelled = std::pin::pin!(token.cancelled());
        let line = std::pin::pin!(self.next_line());
        match future::select(cancelled, line).await {
            Either::Left(((), _)) => Err(StreamError::Cancelled),
            Either::Right((result, _)) => result,
        }
    }

    /// Unwrap the underlying reader, discarding buffered bytes
    pub fn into_inner(self) -> R {
        self.inner.into_inner()
    }
}

fn stream_error(e: io::Error) -> StreamError {
    match e.kind() {
        io::ErrorKind::ConnectionAborted => StreamError::Aborted,
        _ => StreamError::Io(e),
    }
}
