//! meetgrid-fencing — generation-based fencing for per-meeting state.
//!
//! Every time a coordinator offers a meeting to a controller it claims a
//! fresh generation. Writes to per-meeting state present that generation
//! and are rejected once a newer one has been claimed, so a controller
//! that silently lost contact (or a coordinator that lost a race) can
//! never clobber state produced by its successor.
//!
//! # Architecture
//!
//! ```text
//! FencingStore (trait)
//!   ├── StateStore          — embedded redb tables, one write txn per CAS
//!   └── RedisFencingStore   — shared Redis, Lua script per CAS
//!
//! MeetingFence — one writer's handle: fixed generation, latches on FencedOut
//! ```

pub mod embedded;
pub mod error;
pub mod fence;
pub mod redis_store;

use async_trait::async_trait;

pub use error::{FencingError, FencingResult};
pub use fence::MeetingFence;
pub use meetgrid_state::{FenceOutcome, FencedValue};
pub use redis_store::RedisFencingStore;

/// A store of per-meeting generations and generation-guarded values.
#[async_trait]
pub trait FencingStore: Send + Sync {
    /// Atomically increment and return the meeting's generation (first claim is 1).
    async fn advance_generation(&self, meeting_id: &str) -> FencingResult<u64>;

    /// The meeting's stored generation, 0 if never claimed.
    async fn current_generation(&self, meeting_id: &str) -> FencingResult<u64>;

    /// Write `value` iff `generation` is at least the stored generation;
    /// on success the stored generation becomes `generation`.
    async fn fenced_write(
        &self,
        meeting_id: &str,
        field: &str,
        value: &str,
        generation: u64,
        writer_id: &str,
    ) -> FencingResult<FenceOutcome>;

    /// Read a fenced value.
    async fn read_fenced(&self, meeting_id: &str, field: &str)
    -> FencingResult<Option<FencedValue>>;
}
