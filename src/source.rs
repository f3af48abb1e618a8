//! Frame sources: where the read half gets its frames from.
//!
//! [`FrameSource`] yields the next decoded [`Frame`] or a classified
//! [`ReceiveError`]. Its receive deadline is controlled separately,
//! through a [`ReceiveDeadline`], because the deadline has to be moved
//! while a receive is in flight and the source itself is borrowed by it.
//!
//! [`FramedSource`] is the production implementation over any tokio
//! reader; tests substitute scripted sources.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{ReceiveError, Result};
use crate::protocol::{Frame, FrameBuffer, DEFAULT_MAX_PAYLOAD_SIZE};

/// Boxed future returned by the object-safe traits in this crate.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Read one frame from an underlying channel.
pub trait FrameSource: Send {
    /// Wait for the next frame.
    ///
    /// Must return [`ReceiveError::DeadlineExceeded`] once the deadline set
    /// through the matching [`ReceiveDeadline`] passes, including when it
    /// is moved into the past while this call is pending, and
    /// [`ReceiveError::UnexpectedEof`] when the channel ends.
    fn receive(&mut self) -> BoxFuture<'_, std::result::Result<Frame, ReceiveError>>;
}

/// Deadline control for a [`FrameSource`].
pub trait ReceiveDeadline: Send + Sync {
    /// Set (or clear, with `None`) the receive deadline.
    fn set_receive_deadline(&self, deadline: Option<Instant>) -> Result<()>;
}

/// Deadline control for a [`FramedSource`].
#[derive(Debug, Clone)]
pub struct DeadlineHandle {
    tx: Arc<watch::Sender<Option<Instant>>>,
}

impl DeadlineHandle {
    /// Currently configured deadline.
    pub fn get(&self) -> Option<Instant> {
        *self.tx.borrow()
    }
}

impl ReceiveDeadline for DeadlineHandle {
    fn set_receive_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.tx.send_replace(deadline);
        Ok(())
    }
}

/// Frame source decoding length-prefixed frames from a tokio reader.
pub struct FramedSource<R> {
    reader: R,
    frames: FrameBuffer,
    /// Frames decoded by an earlier read but not yet handed out.
    ready: VecDeque<Frame>,
    deadline: watch::Receiver<Option<Instant>>,
    /// False once every [`DeadlineHandle`] is gone.
    deadline_live: bool,
    read_buf: Vec<u8>,
}

impl<R> FramedSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    /// Create a source with the default payload limit.
    pub fn new(reader: R) -> (Self, DeadlineHandle) {
        Self::with_max_payload(reader, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a source rejecting payloads larger than `max_payload_size`.
    pub fn with_max_payload(reader: R, max_payload_size: u32) -> (Self, DeadlineHandle) {
        let (tx, rx) = watch::channel(None);
        let source = Self {
            reader,
            frames: FrameBuffer::with_max_payload(max_payload_size),
            ready: VecDeque::new(),
            deadline: rx,
            deadline_live: true,
            read_buf: vec![0u8; 16 * 1024],
        };
        (source, DeadlineHandle { tx: Arc::new(tx) })
    }

    async fn next_frame(&mut self) -> std::result::Result<Frame, ReceiveError> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(frame);
            }

            let deadline = *self.deadline.borrow_and_update();
            if deadline.is_some_and(|d| d <= Instant::now()) {
                return Err(ReceiveError::DeadlineExceeded);
            }

            tokio::select! {
                read = self.reader.read(&mut self.read_buf) => {
                    let n = read?;
                    if n == 0 {
                        if !self.frames.is_idle() {
                            tracing::debug!(
                                buffered = self.frames.len(),
                                "channel ended inside a frame"
                            );
                        }
                        return Err(ReceiveError::UnexpectedEof);
                    }
                    let frames = self.frames.push(&self.read_buf[..n])?;
                    self.ready.extend(frames);
                }
                _ = sleep_until(deadline) => {
                    return Err(ReceiveError::DeadlineExceeded);
                }
                changed = self.deadline.changed(), if self.deadline_live => {
                    if changed.is_err() {
                        self.deadline_live = false;
                    }
                }
            }
        }
    }
}

impl<R> FrameSource for FramedSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    fn receive(&mut self) -> BoxFuture<'_, std::result::Result<Frame, ReceiveError>> {
        Box::pin(self.next_frame())
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
