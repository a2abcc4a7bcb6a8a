//! In-memory byte pipe
//!
//! A read on an empty, open pipe blocks until data arrives, the writer
//! closes (end of stream) or the writer aborts (error). With capacity 0 a
//! write blocks until the reader has consumed every byte of it; with
//! capacity n a write blocks only while the buffer is full.

use crate::task::{current_bubble, register_wait};
use bytes::{Buf, BytesMut};
use futures::io::{AsyncRead, AsyncWrite};
use parking_lot::Mutex;
use quiesce_core::{BlockingReason, BubbleId, StreamOp, PIPE_CAPACITY_BYTES_MAX};
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Create a synchronous pipe: every write waits for the reader
pub fn pipe() -> (PipeWriter, PipeReader) {
    pipe_with_capacity(0)
}

/// Create a pipe buffering up to `capacity` bytes
pub fn pipe_with_capacity(capacity: usize) -> (PipeWriter, PipeReader) {
    assert!(
        capacity <= PIPE_CAPACITY_BYTES_MAX,
        "pipe capacity {} exceeds {}",
        capacity,
        PIPE_CAPACITY_BYTES_MAX
    );

    let shared = Arc::new(PipeShared {
        owner: current_bubble(),
        state: Mutex::new(PipeState {
            buf: BytesMut::new(),
            capacity,
            writer_closed: false,
            aborted: false,
            reader_closed: false,
            consumed: 0,
            in_flight: None,
            read_waker: None,
            write_waker: None,
        }),
    });
    (
        PipeWriter {
            shared: shared.clone(),
        },
        PipeReader { shared },
    )
}

/// A synchronous write waiting for the reader
#[derive(Debug, Clone, Copy)]
struct InFlight {
    /// Done once `consumed` reaches this
    until: u64,
    len: usize,
    /// Address and length of the caller's buffer, to tell a retry of this
    /// write from a new write after the original future was dropped
    data: (usize, usize),
}

impl InFlight {
    fn is_for(&self, data: &[u8]) -> bool {
        self.data == (data.as_ptr() as usize, data.len())
    }
}

#[derive(Debug)]
struct PipeState {
    buf: BytesMut,
    capacity: usize,
    writer_closed: bool,
    aborted: bool,
    reader_closed: bool,
    /// Total bytes handed to the reader
    consumed: u64,
    in_flight: Option<InFlight>,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

#[derive(Debug)]
struct PipeShared {
    owner: Option<BubbleId>,
    state: Mutex<PipeState>,
}

impl PipeShared {
    fn close_writer(&self, abort: bool) {
        let reader = {
            let mut state = self.state.lock();
            state.writer_closed = true;
            state.aborted |= abort;
            state.read_waker.take()
        };
        if let Some(waker) = reader {
            waker.wake();
        }
    }

    fn close_reader(&self) {
        let writer = {
            let mut state = self.state.lock();
            state.reader_closed = true;
            state.buf.clear();
            state.write_waker.take()
        };
        if let Some(waker) = writer {
            waker.wake();
        }
    }
}

/// Writing half of a pipe; dropping it closes the pipe
pub struct PipeWriter {
    shared: Arc<PipeShared>,
}

impl PipeWriter {
    /// Close the pipe: the reader drains buffered bytes, then sees end of stream
    pub fn close(&self) {
        self.shared.close_writer(false);
    }

    /// Close the pipe with an error: the reader's next read fails with
    /// `ConnectionAborted`
    pub fn abort(&self) {
        self.shared.close_writer(true);
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        let owner = self.shared.owner;
        let mut state = self.shared.state.lock();

        if state.reader_closed {
            state.in_flight = None;
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "pipe reader was closed",
            )));
        }
        if state.writer_closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "write on a closed pipe",
            )));
        }

        if let Some(in_flight) = state.in_flight {
            let drained = state.consumed >= in_flight.until;
            if !drained {
                // Either this write is still in flight, or an abandoned one
                // must drain before new bytes are queued behind it
                state.write_waker = Some(cx.waker().clone());
                drop(state);
                register_wait(owner, BlockingReason::StreamIo { op: StreamOp::Write });
                return Poll::Pending;
            }
            state.in_flight = None;
            if in_flight.is_for(data) {
                return Poll::Ready(Ok(in_flight.len));
            }
        }

        if data.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let room = if state.capacity == 0 {
            PIPE_CAPACITY_BYTES_MAX.saturating_sub(state.buf.len())
        } else {
            state.capacity.saturating_sub(state.buf.len())
        };
        if room == 0 {
            state.write_waker = Some(cx.waker().clone());
            drop(state);
            register_wait(owner, BlockingReason::StreamIo { op: StreamOp::Write });
            return Poll::Pending;
        }

        let len = data.len().min(room);
        state.buf.extend_from_slice(&data[..len]);
        let reader = state.read_waker.take();

        let result = if state.capacity == 0 {
            let until = state.consumed + state.buf.len() as u64;
            state.in_flight = Some(InFlight {
                until,
                len,
                data: (data.as_ptr() as usize, data.len()),
            });
            state.write_waker = Some(cx.waker().clone());
            Poll::Pending
        } else {
            Poll::Ready(Ok(len))
        };
        drop(state);

        if let Some(waker) = reader {
            waker.wake();
        }
        if result.is_pending() {
            register_wait(owner, BlockingReason::StreamIo { op: StreamOp::Write });
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shared.close_writer(false);
        Poll::Ready(Ok(()))
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.shared.close_writer(false);
    }
}

impl fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeWriter")
            .field("owner", &self.shared.owner)
            .finish_non_exhaustive()
    }
}

/// Reading half of a pipe; dropping it makes further writes fail
pub struct PipeReader {
    shared: Arc<PipeShared>,
}

impl PipeReader {
    /// Close the reading side; pending and future writes fail with `BrokenPipe`
    pub fn close(&self) {
        self.shared.close_reader();
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, out: &mut [u8]) -> Poll<io::Result<usize>> {
        let owner = self.shared.owner;
        let mut state = self.shared.state.lock();

        if state.aborted {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "pipe writer aborted",
            )));
        }
        if state.reader_closed {
            return Poll::Ready(Ok(0));
        }

        if !state.buf.is_empty() {
            if out.is_empty() {
                return Poll::Ready(Ok(0));
            }
            let len = out.len().min(state.buf.len());
            out[..len].copy_from_slice(&state.buf[..len]);
            state.buf.advance(len);
            state.consumed += len as u64;
            let writer = state.write_waker.take();
            drop(state);
            if let Some(waker) = writer {
                waker.wake();
            }
            return Poll::Ready(Ok(len));
        }

        if state.writer_closed {
            return Poll::Ready(Ok(0));
        }

        state.read_waker = Some(cx.waker().clone());
        drop(state);
        register_wait(owner, BlockingReason::StreamIo { op: StreamOp::Read });
        Poll::Pending
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        self.shared.close_reader();
    }
}

impl fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeReader")
            .field("owner", &self.shared.owner)
            .finish_non_exhaustive()
    }
}
