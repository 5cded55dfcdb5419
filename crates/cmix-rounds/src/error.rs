//! Error types for cmix-rounds.

use std::time::Duration;

use thiserror::Error;

/// Result type for cmix-rounds operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while waiting on the round queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No qualifying round appeared before the deadline.
    #[error("timed out getting upcoming round after {0:?}")]
    DeadlineExceeded(Duration),
}
