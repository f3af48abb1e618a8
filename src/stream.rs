//! A bidirectional stream over one data channel.
//!
//! [`Stream`] pairs a [`StreamReader`] with a write half. The state both
//! halves share (direction state, close cause, the outgoing frame queue)
//! lives in [`StreamShared`], which is what the reader sees through the
//! [`OwningStream`] trait.
//!
//! # Example
//!
//! ```no_run
//! use dcstream::StreamBuilder;
//!
//! # async fn run() -> dcstream::Result<()> {
//! let (local, _remote) = tokio::io::duplex(64 * 1024);
//! let (read_half, write_half) = tokio::io::split(local);
//! let (stream, _writer) = StreamBuilder::new(1).connect(read_half, write_half);
//!
//! stream.write(b"ping").await?;
//! let mut buf = [0u8; 4];
//! let n = stream.read(&mut buf).await?;
//! stream.close().await?;
//! # let _ = n;
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::StreamConfig;
use crate::error::{CloseCause, Result, StreamError};
use crate::protocol::Flag;
use crate::reader::StreamReader;
use crate::source::{BoxFuture, FrameSource, FramedSource, ReceiveDeadline};
use crate::state::{ChannelState, StateHandler};
use crate::writer::{spawn_writer_task, OutboundFrame, WriterHandle};

/// What the read half needs from the stream that owns it.
pub trait OwningStream: Send + Sync {
    /// Direction state shared by both halves.
    fn state(&self) -> &StateHandler;

    /// True once both directions are done.
    fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Recorded reason for an abnormal teardown.
    fn close_cause(&self) -> Option<CloseCause>;

    /// Abort both directions, telling the remote if possible.
    fn reset(&self);

    /// Tear the stream down. `is_reset` records [`CloseCause::Reset`];
    /// `notify_connection` tells the owning connection the stream is gone.
    fn close(&self, is_reset: bool, notify_connection: bool);

    /// Send a control-only frame to the remote.
    fn send_control_frame(&self, flag: Flag) -> BoxFuture<'_, Result<()>>;

    /// React to a flag received from the remote.
    fn process_incoming_flag(&self, flag: Flag);
}

/// State shared between the halves of a [`Stream`].
pub struct StreamShared {
    id: u16,
    state: StateHandler,
    close_cause: Mutex<Option<CloseCause>>,
    torn_down: AtomicBool,
    writer: WriterHandle,
    receive_deadline: Arc<dyn ReceiveDeadline>,
    on_close: Option<mpsc::UnboundedSender<u16>>,
}

impl StreamShared {
    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    /// Tear down because the connection is gone.
    ///
    /// The connection already knows, so it is not notified.
    pub fn abort(&self, cause: CloseCause) {
        self.teardown(Some(cause), false);
    }

    fn teardown(&self, cause: Option<CloseCause>, notify_connection: bool) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(cause) = cause {
            self.close_cause
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get_or_insert(cause);
        }
        tracing::debug!(id = self.id, ?cause, "closing stream");

        self.state.close();

        // A reader blocked in receive wakes up and reports the close cause.
        if let Err(err) = self
            .receive_deadline
            .set_receive_deadline(Some(Instant::now()))
        {
            tracing::debug!(id = self.id, %err, "could not interrupt pending receive");
        }

        if notify_connection {
            if let Some(tx) = &self.on_close {
                let _ = tx.send(self.id);
            }
        }
    }
}

impl OwningStream for StreamShared {
    fn state(&self) -> &StateHandler {
        &self.state
    }

    fn close_cause(&self) -> Option<CloseCause> {
        *self
            .close_cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn reset(&self) {
        if self.is_closed() {
            return;
        }
        if let Err(err) = self.writer.try_send(OutboundFrame::control(Flag::Reset)) {
            tracing::debug!(id = self.id, %err, "could not write RESET message");
        }
        self.close(true, true);
    }

    fn close(&self, is_reset: bool, notify_connection: bool) {
        self.teardown(is_reset.then_some(CloseCause::Reset), notify_connection);
    }

    fn send_control_frame(&self, flag: Flag) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.writer.send(OutboundFrame::control(flag)))
    }

    fn process_incoming_flag(&self, flag: Flag) {
        if self.is_closed() {
            return;
        }
        let (state, reset) = self.state.handle_inbound_flag(flag);
        tracing::debug!(id = self.id, %flag, ?state, "processed incoming flag");
        if state == ChannelState::Closed {
            self.close(reset, true);
        }
    }
}

/// Builder for [`Stream`].
pub struct StreamBuilder {
    id: u16,
    config: StreamConfig,
    on_close: Option<mpsc::UnboundedSender<u16>>,
}

impl StreamBuilder {
    pub fn new(id: u16) -> Self {
        Self {
            id,
            config: StreamConfig::default(),
            on_close: None,
        }
    }

    /// Use `config` instead of the defaults.
    ///
    /// Fails if the configuration does not pass [`StreamConfig::validate`].
    pub fn config(mut self, config: StreamConfig) -> Result<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// Receive the stream id on `tx` when the stream is torn down.
    pub fn close_notifier(mut self, tx: mpsc::UnboundedSender<u16>) -> Self {
        self.on_close = Some(tx);
        self
    }

    /// Assemble a stream from its parts.
    ///
    /// `receive_deadline` must control the deadline of `source`; frames
    /// sent through `writer` go to the remote.
    pub fn build<S: FrameSource>(
        self,
        source: S,
        receive_deadline: Arc<dyn ReceiveDeadline>,
        writer: WriterHandle,
    ) -> Stream<S> {
        let shared = Arc::new(StreamShared {
            id: self.id,
            state: StateHandler::new(),
            close_cause: Mutex::new(None),
            torn_down: AtomicBool::new(false),
            writer,
            receive_deadline: receive_deadline.clone(),
            on_close: self.on_close,
        });
        let reader = StreamReader::new(shared.clone(), source, receive_deadline);

        Stream {
            shared,
            reader,
            max_payload_size: self.config.max_payload_size() as usize,
        }
    }

    /// Run a stream over a tokio channel split into halves.
    ///
    /// Spawns the writer task; must be called inside a tokio runtime.
    pub fn connect<R, W>(
        self,
        reader: R,
        writer: W,
    ) -> (Stream<FramedSource<R>>, JoinHandle<Result<()>>)
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (source, deadline) =
            FramedSource::with_max_payload(reader, self.config.max_payload_size());
        let (handle, task) = spawn_writer_task(writer, self.config.writer_config());
        (self.build(source, Arc::new(deadline), handle), task)
    }
}

/// A bidirectional byte stream.
pub struct Stream<S> {
    shared: Arc<StreamShared>,
    reader: StreamReader<S, StreamShared>,
    max_payload_size: usize,
}

impl<S: FrameSource> Stream<S> {
    #[inline]
    pub fn id(&self) -> u16 {
        self.shared.id
    }

    /// See [`StreamReader::read`].
    pub async fn read(&self, buf: &mut [u8]) -> Result<usize> {
        self.reader.read(buf).await
    }

    /// See [`StreamReader::set_read_deadline`].
    pub fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.reader.set_read_deadline(deadline)
    }

    /// See [`StreamReader::close_read`].
    pub async fn close_read(&self) -> Result<()> {
        self.reader.close_read().await
    }

    /// Send `data`, split into frames of at most the configured payload size.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        for chunk in data.chunks(self.max_payload_size.max(1)) {
            self.ensure_writable()?;
            self.shared
                .writer
                .send(OutboundFrame::data(Bytes::copy_from_slice(chunk)))
                .await?;
        }
        Ok(data.len())
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.shared.state.allow_write() {
            return Ok(());
        }
        Err(match self.shared.close_cause() {
            Some(cause) => cause.into(),
            None => StreamError::StreamClosed,
        })
    }

    /// Send FIN and close the write side.
    ///
    /// No-op if the write side is already closed.
    pub async fn close_write(&self) -> Result<()> {
        if self.shared.is_closed() || !self.shared.state.allow_write() {
            return Ok(());
        }

        self.shared.send_control_frame(Flag::Fin).await?;

        if self.shared.state.close_write() == ChannelState::Closed {
            self.shared.close(false, true);
        }
        Ok(())
    }

    /// Close both directions. Resets the stream if either side fails.
    pub async fn close(&self) -> Result<()> {
        let write = self.close_write().await;
        let read = self.close_read().await;
        if write.is_err() || read.is_err() {
            self.reset();
        }
        write.and(read)
    }

    /// Abort both directions immediately.
    pub fn reset(&self) {
        self.shared.reset();
    }

    pub fn state(&self) -> ChannelState {
        self.shared.state.get()
    }

    pub fn close_cause(&self) -> Option<CloseCause> {
        self.shared.close_cause()
    }

    pub fn reader(&self) -> &StreamReader<S, StreamShared> {
        &self.reader
    }

    pub fn shared(&self) -> &Arc<StreamShared> {
        &self.shared
    }
}
