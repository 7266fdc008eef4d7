//! Error types for fencing operations.

use meetgrid_state::StateError;
use thiserror::Error;

/// Result type alias for fencing operations.
pub type FencingResult<T> = Result<T, FencingError>;

#[derive(Debug, Error)]
pub enum FencingError {
    /// The presented generation is older than the stored one. Terminal
    /// for the writer.
    #[error("fenced out of meeting {meeting_id}: presented generation {presented}, current {current}")]
    FencedOut {
        meeting_id: String,
        presented: u64,
        current: u64,
    },

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("malformed fenced value: {0}")]
    Decode(String),
}
