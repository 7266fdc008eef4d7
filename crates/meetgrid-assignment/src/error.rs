//! Coordinator error types.

use meetgrid_fencing::FencingError;
use meetgrid_placement::SelectionError;
use meetgrid_state::StateError;
use thiserror::Error;

/// Errors returned by the assignment coordinator.
///
/// Callers outside the control plane only ever see the `Display` text of
/// `ServiceUnavailable`; why each controller refused is logged, not returned.
#[derive(Debug, Error)]
pub enum AssignmentError {
    #[error("no meeting controller available")]
    ServiceUnavailable,

    #[error("meeting not assigned: {0}")]
    NotAssigned(String),

    #[error("meeting {meeting_id} is not hosted by {mc_id}")]
    NotOwner { meeting_id: String, mc_id: String },

    #[error("media handler {mh_id} is not bound to meeting {meeting_id}")]
    NotBound { meeting_id: String, mh_id: String },

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("fencing store error: {0}")]
    Fencing(#[from] FencingError),
}

impl From<SelectionError> for AssignmentError {
    fn from(e: SelectionError) -> Self {
        match e {
            SelectionError::NoCapacity { .. } => AssignmentError::ServiceUnavailable,
            SelectionError::State(e) => AssignmentError::State(e),
        }
    }
}

pub type AssignmentResult<T> = Result<T, AssignmentError>;
