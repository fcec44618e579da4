//! Error types for shared queue access.

use thiserror::Error;

use crate::types::Token;

/// Errors raised by [`crate::shared_queue::SharedQueue`] operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Another thread panicked while holding the queue lock.
    #[error("shared queue mutex poisoned")]
    Poisoned,
    /// The end-of-stream marker is already queued; nothing may follow it.
    #[error("append after end-of-stream rejected: {0}")]
    Sealed(Token),
}

impl<T> From<std::sync::PoisonError<T>> for QueueError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::Poisoned
    }
}
