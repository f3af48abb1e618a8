//! Per-direction stream state.
//!
//! ```text
//!              close_read / FIN in            close_write / STOP_SENDING in
//!   Open ─────────────────────────► ReadClosed      Open ──────────────► WriteClosed
//!   ReadClosed ─ close_write / STOP_SENDING in ─► Closed
//!   WriteClosed ─ close_read / FIN in ───────────► Closed
//!   any ─ RESET in / reset / close ──────────────► Closed
//! ```

use std::sync::{Mutex, PoisonError};

use crate::protocol::Flag;

/// Combined state of both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Both directions open.
    Open,
    /// We no longer accept data; writing still allowed.
    ReadClosed,
    /// We no longer send data; reading still allowed.
    WriteClosed,
    /// Both directions done.
    Closed,
}

impl ChannelState {
    #[inline]
    pub fn allows_read(self) -> bool {
        matches!(self, ChannelState::Open | ChannelState::WriteClosed)
    }

    #[inline]
    pub fn allows_write(self) -> bool {
        matches!(self, ChannelState::Open | ChannelState::ReadClosed)
    }

    fn after_read_closed(self) -> Self {
        match self {
            ChannelState::Open => ChannelState::ReadClosed,
            ChannelState::WriteClosed | ChannelState::Closed => ChannelState::Closed,
            ChannelState::ReadClosed => ChannelState::ReadClosed,
        }
    }

    fn after_write_closed(self) -> Self {
        match self {
            ChannelState::Open => ChannelState::WriteClosed,
            ChannelState::ReadClosed | ChannelState::Closed => ChannelState::Closed,
            ChannelState::WriteClosed => ChannelState::WriteClosed,
        }
    }
}

/// Thread-safe holder of a stream's [`ChannelState`].
#[derive(Debug)]
pub struct StateHandler {
    state: Mutex<ChannelState>,
}

impl StateHandler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChannelState::Open),
        }
    }

    fn update(&self, f: impl FnOnce(ChannelState) -> ChannelState) -> ChannelState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = f(*state);
        *state
    }

    pub fn get(&self) -> ChannelState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether incoming payload is still accepted.
    pub fn allow_read(&self) -> bool {
        self.get().allows_read()
    }

    pub fn allow_write(&self) -> bool {
        self.get().allows_write()
    }

    pub fn is_closed(&self) -> bool {
        self.get() == ChannelState::Closed
    }

    /// Local read-closed transition. Returns the resulting state.
    pub fn close_read(&self) -> ChannelState {
        self.update(ChannelState::after_read_closed)
    }

    /// Local write-closed transition. Returns the resulting state.
    pub fn close_write(&self) -> ChannelState {
        self.update(ChannelState::after_write_closed)
    }

    /// Apply a flag received from the remote.
    ///
    /// Returns the resulting state and whether the flag was a reset.
    pub fn handle_inbound_flag(&self, flag: Flag) -> (ChannelState, bool) {
        match flag {
            Flag::Fin => (self.close_read(), false),
            Flag::StopSending => (self.close_write(), false),
            Flag::Reset => (self.close(), true),
        }
    }

    /// Force both directions closed.
    pub fn close(&self) -> ChannelState {
        self.update(|_| ChannelState::Closed)
    }
}

impl Default for StateHandler {
    fn default() -> Self {
        Self::new()
    }
}
