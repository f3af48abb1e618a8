//! # dcstream
//!
//! Byte streams multiplexed over a message-oriented data channel.
//!
//! Each message on the channel is one frame: a 6-byte header followed by an
//! optional payload. The header may carry a control flag (FIN, STOP_SENDING
//! or RESET) that drives the per-direction state of the stream.
//!
//! ## Architecture
//!
//! - **Read half** ([`StreamReader`]): buffers payload, hands flags to the
//!   owning stream, honours read deadlines and `close_read`.
//! - **Write half** ([`Stream::write`]): chunks data into frames and sends
//!   them through a dedicated writer task.
//! - **Frame source** ([`FrameSource`]): anything yielding frames; the
//!   channel's own receive deadline is set through [`ReceiveDeadline`].
//!
//! ## Example
//!
//! ```no_run
//! use dcstream::{StreamBuilder, StreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> dcstream::Result<()> {
//!     let (local, _remote) = tokio::io::duplex(64 * 1024);
//!     let (read_half, write_half) = tokio::io::split(local);
//!
//!     let (stream, _writer) = StreamBuilder::new(1)
//!         .config(StreamConfig::default())?
//!         .connect(read_half, write_half);
//!
//!     let mut body = Vec::new();
//!     stream.reader().read_to_end(&mut body).await?;
//!     stream.close().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod reader;
pub mod source;
pub mod state;
pub mod stream;
pub mod writer;

mod deadline;

pub use config::StreamConfig;
pub use error::{CloseCause, ReceiveError, Result, StreamError};
pub use reader::StreamReader;
pub use source::{BoxFuture, DeadlineHandle, FrameSource, FramedSource, ReceiveDeadline};
pub use state::{ChannelState, StateHandler};
pub use stream::{OwningStream, Stream, StreamBuilder, StreamShared};
pub use writer::{spawn_writer_task, OutboundFrame, WriterConfig, WriterHandle};
