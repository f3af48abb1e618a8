//! Dedicated writer task for outgoing frames.
//!
//! Both halves of a stream (data from `write`, control flags from
//! `close_read`, `close_write` and `reset`) send through a cloneable
//! [`WriterHandle`] into one task that owns the channel's write half.
//!
//! # Architecture
//!
//! ```text
//! write()       ─┐
//! close_read()  ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Channel
//! reset()       ─┘
//! ```
//!
//! Ready frames are batched into a single vectored write.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::{Result, StreamError};
use crate::protocol::{Flag, Frame, Header, HEADER_SIZE};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// Interval between backpressure checks.
const BACKPRESSURE_CHECK_INTERVAL: Duration = Duration::from_micros(100);

/// A frame ready to be written to the channel.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Pre-encoded header.
    pub header: [u8; HEADER_SIZE],
    /// Payload bytes (empty for control-only frames).
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Encode a frame for sending.
    pub fn new(frame: &Frame) -> Self {
        Self {
            header: frame.header().encode(),
            payload: frame.payload.clone().unwrap_or_default(),
        }
    }

    /// A control-only frame carrying `flag`.
    #[inline]
    pub fn control(flag: Flag) -> Self {
        Self::new(&Frame::control(flag))
    }

    /// A data-only frame.
    #[inline]
    pub fn data(payload: Bytes) -> Self {
        Self::new(&Frame::data(payload))
    }

    /// Flag carried by this frame, if any.
    pub fn flag(&self) -> Option<Flag> {
        Header::decode(&self.header).and_then(|h| h.flag())
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// Cheaply cloneable; all clones feed the same task.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    /// Frames sent but not yet written (for backpressure). `None` when
    /// nothing drains the count, in which case the bounded queue alone
    /// limits the sender.
    pending: Option<Arc<AtomicUsize>>,
    max_pending: usize,
    timeout: Duration,
}

impl WriterHandle {
    fn new(
        tx: mpsc::Sender<OutboundFrame>,
        pending: Option<Arc<AtomicUsize>>,
        max_pending: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            tx,
            pending,
            max_pending,
            timeout,
        }
    }

    /// Create a handle whose frames are delivered to the returned receiver
    /// instead of a writer task.
    ///
    /// Useful when frames are forwarded to a transport that is not an
    /// [`AsyncWrite`], and in tests. Pending frames are not counted: the
    /// queue of `channel_capacity` frames is the only limit.
    pub fn detached(config: &WriterConfig) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(config.channel_capacity);
        let handle = Self::new(
            tx,
            None,
            config.max_pending_frames,
            config.backpressure_timeout,
        );
        (handle, rx)
    }

    /// Send a frame to the writer task.
    ///
    /// Waits while backpressure is active, failing with
    /// `BackpressureTimeout` after the configured duration.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_backpressure_active() {
            self.wait_for_backpressure().await?;
        }

        self.track_pending();

        self.tx.send(frame).await.map_err(|_| {
            self.untrack_pending();
            StreamError::ConnectionClosed
        })
    }

    fn track_pending(&self) {
        if let Some(pending) = &self.pending {
            pending.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn untrack_pending(&self) {
        if let Some(pending) = &self.pending {
            pending.fetch_sub(1, Ordering::Release);
        }
    }

    async fn wait_for_backpressure(&self) -> Result<()> {
        let start = Instant::now();

        loop {
            if !self.is_backpressure_active() {
                return Ok(());
            }

            if start.elapsed() > self.timeout {
                return Err(StreamError::BackpressureTimeout);
            }

            tokio::time::sleep(BACKPRESSURE_CHECK_INTERVAL).await;
        }
    }

    /// Try to send a frame without waiting.
    ///
    /// Returns `Err(BackpressureTimeout)` immediately if at capacity.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        if self.is_backpressure_active() {
            return Err(StreamError::BackpressureTimeout);
        }

        self.track_pending();

        self.tx.try_send(frame).map_err(|e| {
            self.untrack_pending();
            match e {
                mpsc::error::TrySendError::Full(_) => StreamError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => StreamError::ConnectionClosed,
            }
        })
    }

    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.pending_count() >= self.max_pending
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending
            .as_ref()
            .map_or(0, |pending| pending.load(Ordering::Acquire))
    }

    /// True once the writer task (or detached receiver) is gone.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends cleanly once every handle is dropped, or with an error
/// if the channel fails.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(
        tx,
        Some(pending.clone()),
        config.max_pending_frames,
        config.backpressure_timeout,
    );

    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(first) = rx.recv().await {
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        if let Err(e) = write_batch(&mut writer, &batch).await {
            tracing::warn!("Writer task failed: {}", e);
            return Err(e);
        }

        pending.fetch_sub(batch_size, Ordering::Release);
    }

    tracing::debug!("Writer channel closed, shutting down writer");
    writer.shutdown().await?;
    Ok(())
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(StreamError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data after `skip_bytes`.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.header[..], &frame.payload[..]] {
            let end = offset + part.len();
            if !part.is_empty() && skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameBuffer;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    #[test]
    fn test_outbound_frame_data() {
        let frame = OutboundFrame::data(Bytes::from_static(b"hello"));

        assert_eq!(frame.payload.len(), 5);
        assert_eq!(frame.size(), HEADER_SIZE + 5);
        assert_eq!(frame.flag(), None);
    }

    #[test]
    fn test_outbound_frame_control() {
        let frame = OutboundFrame::control(Flag::StopSending);

        assert!(frame.payload.is_empty());
        assert_eq!(frame.size(), HEADER_SIZE);
        assert_eq!(frame.flag(), Some(Flag::StopSending));
    }

    #[test]
    fn test_writer_config_default() {
        let config = WriterConfig::default();
        assert_eq!(config.max_pending_frames, DEFAULT_MAX_PENDING_FRAMES);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.backpressure_timeout, DEFAULT_BACKPRESSURE_TIMEOUT);
    }

    #[tokio::test]
    async fn test_writer_task_writes_decodable_frames() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, WriterConfig::default());

        handle
            .send(OutboundFrame::data(Bytes::from_static(b"hello")))
            .await
            .unwrap();
        handle
            .send(OutboundFrame::control(Flag::Fin))
            .await
            .unwrap();
        drop(handle);

        let mut bytes = Vec::new();
        server.read_to_end(&mut bytes).await.unwrap();

        let frames = FrameBuffer::new().push(&bytes).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload(), Some(&b"hello"[..]));
        assert_eq!(frames[1].flag(), Some(Flag::Fin));
    }

    #[tokio::test]
    async fn test_detached_handle_delivers_to_receiver() {
        let (handle, mut rx) = WriterHandle::detached(&WriterConfig::default());

        handle
            .send(OutboundFrame::control(Flag::Reset))
            .await
            .unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.flag(), Some(Flag::Reset));
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_detached_handle_keeps_sending_past_pending_limit() {
        let config = WriterConfig {
            max_pending_frames: 2,
            channel_capacity: 4,
            backpressure_timeout: Duration::from_millis(10),
        };
        let (handle, mut rx) = WriterHandle::detached(&config);

        for _ in 0..10 {
            handle
                .send(OutboundFrame::data(Bytes::from_static(b"x")))
                .await
                .unwrap();
            assert!(rx.try_recv().is_ok());
        }
        handle.try_send(OutboundFrame::control(Flag::Reset)).unwrap();
        assert!(!handle.is_backpressure_active());
    }

    #[tokio::test]
    async fn test_detached_try_send_full_queue() {
        let config = WriterConfig {
            channel_capacity: 1,
            ..WriterConfig::default()
        };
        let (handle, _rx) = WriterHandle::detached(&config);

        handle.try_send(OutboundFrame::control(Flag::Fin)).unwrap();
        let result = handle.try_send(OutboundFrame::control(Flag::Reset));
        assert!(matches!(result, Err(StreamError::BackpressureTimeout)));
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (handle, rx) = WriterHandle::detached(&WriterConfig::default());
        drop(rx);

        let result = handle.send(OutboundFrame::control(Flag::Fin)).await;
        assert!(matches!(result, Err(StreamError::ConnectionClosed)));
        assert_eq!(handle.pending_count(), 0);
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_try_send_at_capacity() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(10);
        let pending = Arc::new(AtomicUsize::new(100));
        let handle = WriterHandle::new(tx, Some(pending), 100, Duration::from_secs(1));

        let result = handle.try_send(OutboundFrame::control(Flag::Fin));
        assert!(matches!(result, Err(StreamError::BackpressureTimeout)));
        assert!(handle.is_backpressure_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_backpressure_timeout() {
        let (tx, _rx) = mpsc::channel::<OutboundFrame>(10);
        let pending = Arc::new(AtomicUsize::new(1));
        let handle = WriterHandle::new(tx, Some(pending), 1, Duration::from_millis(10));

        let result = handle.send(OutboundFrame::control(Flag::Fin)).await;
        assert!(matches!(result, Err(StreamError::BackpressureTimeout)));
    }

    #[test]
    fn test_build_remaining_slices_no_skip() {
        let batch = vec![OutboundFrame::data(Bytes::from_static(b"hello"))];

        let slices = build_remaining_slices(&batch, 0);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn test_build_remaining_slices_partial_header() {
        let batch = vec![OutboundFrame::data(Bytes::from_static(b"hello"))];

        let slices = build_remaining_slices(&batch, 4);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 4);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_control_frame_has_no_payload_slice() {
        let batch = vec![
            OutboundFrame::control(Flag::Fin),
            OutboundFrame::data(Bytes::from_static(b"abc")),
        ];

        let slices = build_remaining_slices(&batch, HEADER_SIZE);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE);
        assert_eq!(slices[1].len(), 3);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5)
            .map(|_| OutboundFrame::data(Bytes::from_static(b"abc")))
            .collect();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner().len(), 5 * (HEADER_SIZE + 3));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, WriterConfig::default());

        drop(handle);

        let result = task.await.unwrap();
        assert!(result.is_ok());
    }
}
