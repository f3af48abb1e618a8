//! Read half of a stream.
//!
//! [`StreamReader`] turns the frames of a [`FrameSource`] into an ordered
//! byte stream. Payload is buffered under the reader's lock, the blocking
//! receive happens while that lock is held, and control flags are handed to
//! the [`OwningStream`], which decides what they mean for the stream as a
//! whole.
//!
//! Outcomes of [`StreamReader::read`]:
//! - `Ok(n)` with `n > 0`: bytes copied.
//! - `Ok(0)` with a non-empty buffer: end of stream, the remote sent FIN
//!   and everything was delivered. Repeats on every later call.
//! - `Err(DeadlineExceeded)`: nothing arrived in time.
//! - `Err(Closed(cause))`: the stream was torn down with a recorded cause.
//!   A recorded cause always wins over a timeout.
//! - `Err(StreamClosed)`: the stream is fully closed, or the channel ended
//!   without FIN (the stream is reset on the way out).

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::deadline::DeadlineCell;
use crate::error::{ReceiveError, Result, StreamError};
use crate::protocol::Flag;
use crate::source::{FrameSource, ReceiveDeadline};
use crate::state::ChannelState;
use crate::stream::OwningStream;

/// Buffer and source, only touched under the reader's lock.
struct ReaderState<S> {
    buffer: BytesMut,
    source: S,
}

impl<S> ReaderState<S> {
    /// Move up to `dest.len()` buffered bytes into `dest`.
    fn drain_into(&mut self, dest: &mut [u8]) -> usize {
        let n = dest.len().min(self.buffer.len());
        dest[..n].copy_from_slice(&self.buffer[..n]);
        self.buffer.advance(n);
        n
    }
}

const LATCH_OPEN: u8 = 0;
const LATCH_CLOSING: u8 = 1;
const LATCH_CLOSED: u8 = 2;

/// One-shot latch for `close_read`.
///
/// `Open -> Closing -> Closed`; a failed attempt goes back to `Open` so
/// it can be retried. Callers that find it `Closing` wait on `settled`.
#[derive(Debug, Default)]
struct CloseLatch {
    state: AtomicU8,
    settled: Notify,
}

impl CloseLatch {
    /// Claim the latch. Only one caller at a time gets a guard.
    fn begin(&self) -> Option<ClosingGuard<'_>> {
        self.state
            .compare_exchange(LATCH_OPEN, LATCH_CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| ClosingGuard { latch: self })
    }

    fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == LATCH_CLOSED
    }

    fn settle(&self, state: u8) {
        self.state.store(state, Ordering::Release);
        self.settled.notify_waiters();
    }
}

/// Re-arms the latch unless the close completed.
///
/// Also covers a `close_read` future dropped mid-send.
struct ClosingGuard<'a> {
    latch: &'a CloseLatch,
}

impl ClosingGuard<'_> {
    fn complete(self) {
        self.latch.settle(LATCH_CLOSED);
        std::mem::forget(self);
    }
}

impl Drop for ClosingGuard<'_> {
    fn drop(&mut self) {
        self.latch.settle(LATCH_OPEN);
    }
}

/// Read half of a stream.
///
/// `read` is meant for a single reader at a time. `set_read_deadline` and
/// `close_read` may be called from any task, concurrently with `read`.
pub struct StreamReader<S, O> {
    stream: Arc<O>,
    state: Mutex<ReaderState<S>>,
    deadline: DeadlineCell,
    receive_deadline: Arc<dyn ReceiveDeadline>,
    close_latch: CloseLatch,
}

impl<S, O> StreamReader<S, O>
where
    S: FrameSource,
    O: OwningStream,
{
    /// Create the read half of `stream`.
    ///
    /// `receive_deadline` must control the deadline of `source`.
    pub fn new(stream: Arc<O>, source: S, receive_deadline: Arc<dyn ReceiveDeadline>) -> Self {
        Self {
            stream,
            state: Mutex::new(ReaderState {
                buffer: BytesMut::new(),
                source,
            }),
            deadline: DeadlineCell::new(),
            receive_deadline,
            close_latch: CloseLatch::default(),
        }
    }

    /// Read into `dest`, waiting for data if none is buffered.
    ///
    /// Returns as soon as at least one byte is available. See the module
    /// docs for the full set of outcomes.
    pub async fn read(&self, dest: &mut [u8]) -> Result<usize> {
        loop {
            if self.stream.is_closed() {
                return Err(StreamError::StreamClosed);
            }

            if self.deadline.has_elapsed(Instant::now()) {
                if let Some(cause) = self.stream.close_cause() {
                    tracing::debug!(%cause, "read deadline exceeded on closed stream");
                    return Err(cause.into());
                }
                tracing::debug!("read deadline exceeded");
                return Err(StreamError::DeadlineExceeded);
            }

            let mut state = self.state.lock().await;

            let read = state.drain_into(dest);

            if state.buffer.is_empty() && !self.stream.state().allow_read() {
                if read > 0 {
                    return Ok(read);
                }
                if let Some(cause) = self.stream.close_cause() {
                    tracing::debug!(%cause, "read side closed with cause");
                    return Err(cause.into());
                }
                tracing::debug!("read side drained");
                return Ok(0);
            }

            if read > 0 || dest.is_empty() {
                return Ok(read);
            }

            let frame = match state.source.receive().await {
                Ok(frame) => frame,
                Err(ReceiveError::UnexpectedEof) => {
                    tracing::debug!("channel ended without FIN, resetting stream");
                    self.stream.reset();
                    return Err(StreamError::StreamClosed);
                }
                Err(ReceiveError::DeadlineExceeded) => {
                    let cause = self.stream.close_cause();
                    tracing::debug!(?cause, "receive interrupted by deadline");
                    return Err(match cause {
                        Some(cause) => cause.into(),
                        // Graceful teardown also interrupts the receive.
                        None if self.stream.is_closed() => StreamError::StreamClosed,
                        None => StreamError::DeadlineExceeded,
                    });
                }
                Err(ReceiveError::Other(err)) => return Err(err),
            };

            if self.stream.state().allow_read() {
                if let Some(payload) = &frame.payload {
                    state.buffer.extend_from_slice(payload);
                }
            }

            if let Some(flag) = frame.flag {
                self.stream.process_incoming_flag(flag);
            }
        }
    }

    /// Read until end of stream, appending to `out`.
    ///
    /// Returns the number of bytes appended.
    pub async fn read_to_end(&self, out: &mut Vec<u8>) -> Result<usize> {
        let mut chunk = [0u8; 4096];
        let start = out.len();
        loop {
            match self.read(&mut chunk).await? {
                0 => return Ok(out.len() - start),
                n => out.extend_from_slice(&chunk[..n]),
            }
        }
    }

    /// Set the read deadline. `None` clears it.
    ///
    /// The value is always stored; the returned error comes from forwarding
    /// it to the channel, which interrupts a receive already in progress.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.deadline.set(deadline);
        self.receive_deadline.set_receive_deadline(deadline)
    }

    /// Currently configured read deadline.
    pub fn read_deadline(&self) -> Option<Instant> {
        self.deadline.get()
    }

    /// Tell the remote to stop sending and close the read side.
    ///
    /// Idempotent: once it has succeeded, later calls return `Ok(())`
    /// without sending anything. If STOP_SENDING cannot be sent the local
    /// state is left untouched and a later call retries.
    ///
    /// A call made while another one is sending waits for it. If that
    /// attempt fails, the waiting call makes its own attempt.
    pub async fn close_read(&self) -> Result<()> {
        let closing = loop {
            if self.stream.is_closed() || self.close_latch.is_closed() {
                return Ok(());
            }
            let settled = self.close_latch.settled.notified();
            if let Some(closing) = self.close_latch.begin() {
                break closing;
            }
            if self.close_latch.is_closed() {
                return Ok(());
            }
            settled.await;
        };

        if let Err(err) = self.stream.send_control_frame(Flag::StopSending).await {
            tracing::debug!(%err, "could not write STOP_SENDING message");
            return Err(StreamError::CloseRead(Box::new(err)));
        }

        if self.stream.state().close_read() == ChannelState::Closed {
            self.stream.close(false, true);
        }
        closing.complete();
        Ok(())
    }

    /// True once `close_read` has completed.
    pub fn is_read_closed(&self) -> bool {
        self.close_latch.is_closed()
    }
}
