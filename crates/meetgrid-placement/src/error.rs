//! Selection errors.

use meetgrid_state::{StateError, WorkerKind};
use thiserror::Error;

pub type SelectionResult<T> = Result<T, SelectionError>;

#[derive(Debug, Error)]
pub enum SelectionError {
    /// No eligible worker of this kind in the region.
    #[error("no {kind} with capacity in region {region}")]
    NoCapacity { kind: WorkerKind, region: String },

    #[error("state error: {0}")]
    State(#[from] StateError),
}
