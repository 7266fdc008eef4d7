//! meetgrid-state — embedded state store for meetgrid.
//!
//! Backed by [redb](https://docs.rs/redb), holds the shared state the
//! control plane relies on:
//!
//! - the **worker registry** (one row per MC/MH),
//! - the **assignments** table (one live row per meeting),
//! - the embedded **fencing** tables (generation counters and fenced values).
//!
//! # Atomicity
//!
//! redb serializes write transactions, so every multi-step mutation here
//! (insert-if-absent, compare-and-delete, compare-and-set on a generation,
//! the staleness sweep) runs inside a single write transaction and is
//! atomic with respect to every other writer of the same database.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| $crate::error::StateError::$variant(e.to_string())
    };
}

pub mod assignments;
pub mod error;
pub mod fencing;
pub mod registry;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{StateStore, epoch_secs};
pub use types::*;
