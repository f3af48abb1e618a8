//! Stream configuration.
//!
//! Every field has a default, so a partial JSON document is enough:
//!
//! ```
//! use dcstream::StreamConfig;
//!
//! let config = StreamConfig::from_json(r#"{ "max_message_size": 4096 }"#).unwrap();
//! assert_eq!(config.max_message_size, 4096);
//! assert_eq!(config.channel_capacity, StreamConfig::default().channel_capacity);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StreamError};
use crate::protocol::{DEFAULT_MAX_MESSAGE_SIZE, HEADER_SIZE};
use crate::writer::{
    WriterConfig, DEFAULT_BACKPRESSURE_TIMEOUT, DEFAULT_CHANNEL_CAPACITY,
    DEFAULT_MAX_PENDING_FRAMES,
};

/// Tunables for a [`Stream`](crate::Stream).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Largest message on the channel, header included.
    pub max_message_size: usize,
    /// Capacity of the outgoing frame queue.
    pub channel_capacity: usize,
    /// Pending frames before writers wait for the queue to drain.
    pub max_pending_frames: usize,
    /// How long a writer waits on a full queue.
    pub backpressure_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            backpressure_timeout_ms: DEFAULT_BACKPRESSURE_TIMEOUT.as_millis() as u64,
        }
    }
}

impl StreamConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values make sense together.
    pub fn validate(&self) -> Result<()> {
        if self.max_message_size <= HEADER_SIZE {
            return Err(StreamError::Protocol(format!(
                "max_message_size {} leaves no room for payload",
                self.max_message_size
            )));
        }
        if self.max_message_size - HEADER_SIZE > u32::MAX as usize {
            return Err(StreamError::Protocol(format!(
                "max_message_size {} too large",
                self.max_message_size
            )));
        }
        if self.channel_capacity == 0 {
            return Err(StreamError::Protocol(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Largest payload a single frame may carry.
    pub fn max_payload_size(&self) -> u32 {
        self.max_message_size.saturating_sub(HEADER_SIZE).min(u32::MAX as usize) as u32
    }

    pub fn backpressure_timeout(&self) -> Duration {
        Duration::from_millis(self.backpressure_timeout_ms)
    }

    pub fn writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_pending_frames: self.max_pending_frames,
            channel_capacity: self.channel_capacity,
            backpressure_timeout: self.backpressure_timeout(),
        }
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.max_pending_frames = limit;
        self
    }

    pub fn backpressure_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.backpressure_timeout_ms = timeout_ms;
        self
    }
}
