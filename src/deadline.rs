//! Shared read-deadline cell.
//!
//! A freestanding optional timestamp that any task may read or replace.
//! No larger transaction is built on it: readers re-read it on every loop
//! iteration, so observing a value that is just being replaced is fine.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::time::Instant;

/// Cloneable handle to a shared optional deadline.
///
/// Clones share the same cell.
#[derive(Debug, Clone, Default)]
pub struct DeadlineCell {
    inner: Arc<Mutex<Option<Instant>>>,
}

impl DeadlineCell {
    /// Create an unset cell.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the deadline. `None` clears it.
    pub fn set(&self, deadline: Option<Instant>) {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = deadline;
    }

    /// Current deadline, if any.
    pub fn get(&self) -> Option<Instant> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// True if a deadline is set and not after `now`.
    pub fn has_elapsed(&self, now: Instant) -> bool {
        self.get().is_some_and(|deadline| deadline <= now)
    }
}
