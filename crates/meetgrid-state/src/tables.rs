//! redb table definitions for the meetgrid state store.
//!
//! Tables use `&str` keys. Record tables hold JSON-serialized domain
//! types in `&[u8]` values; the generation table holds raw counters.

use redb::TableDefinition;

/// Worker registry rows keyed by `{worker_id}`.
pub const WORKERS: TableDefinition<&str, &[u8]> = TableDefinition::new("workers");

/// Live meeting assignments keyed by `{meeting_id}`.
pub const ASSIGNMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("assignments");

/// Fencing generation counters keyed by `{meeting_id}`.
pub const GENERATIONS: TableDefinition<&str, u64> = TableDefinition::new("generations");

/// Fenced per-meeting values keyed by `{meeting_id}/{field}`.
pub const FENCED_VALUES: TableDefinition<&str, &[u8]> = TableDefinition::new("fenced_values");
