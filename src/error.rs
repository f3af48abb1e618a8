//! Error types for dcstream.

use std::fmt;

use thiserror::Error;

/// Reason recorded when a stream is torn down abnormally.
///
/// Stored once per stream and handed back to readers in preference to a
/// timeout, so a reader never sees a spurious deadline error for a stream
/// that is permanently gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    /// The stream was reset, locally or by the remote.
    Reset,
    /// The underlying connection went away.
    ConnectionClosed,
}

impl fmt::Display for CloseCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseCause::Reset => f.write_str("stream reset"),
            CloseCause::ConnectionClosed => f.write_str("connection closed"),
        }
    }
}

/// Main error type for all stream operations.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Operation on a fully closed stream, or the remote vanished
    /// without sending FIN.
    #[error("stream closed")]
    StreamClosed,

    /// No data arrived before the read deadline.
    #[error("read deadline exceeded")]
    DeadlineExceeded,

    /// The stream was torn down with a recorded cause.
    #[error("{0}")]
    Closed(CloseCause),

    /// I/O error from the underlying channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error (malformed frame, unknown flag, oversized payload).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The stop-sending frame could not be written.
    #[error("could not close stream for reading: {0}")]
    CloseRead(#[source] Box<StreamError>),

    /// The channel does not support receive deadlines.
    #[error("receive deadline not supported by channel")]
    DeadlineUnsupported,

    /// Writer channel is gone.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl From<CloseCause> for StreamError {
    fn from(cause: CloseCause) -> Self {
        StreamError::Closed(cause)
    }
}

/// Failure of a single [`FrameSource::receive`](crate::source::FrameSource::receive).
///
/// Classified once, where the frame is received, so the read loop can
/// decide between reset, close-cause lookup and propagation.
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// The source's own receive deadline fired.
    #[error("receive deadline exceeded")]
    DeadlineExceeded,

    /// The transport ended without the remote sending FIN.
    #[error("channel ended unexpectedly")]
    UnexpectedEof,

    /// Anything else; propagated to the reader unchanged.
    #[error(transparent)]
    Other(#[from] StreamError),
}

impl From<std::io::Error> for ReceiveError {
    fn from(err: std::io::Error) -> Self {
        ReceiveError::Other(StreamError::Io(err))
    }
}

/// Result type alias using StreamError.
pub type Result<T> = std::result::Result<T, StreamError>;
