//! meetgrid candidate selection — which MC and which MHs get a meeting.
//!
//! Selection reads the worker registry, keeps only `Healthy` workers with
//! headroom in the requested region, weights each by remaining capacity
//! (boosted when it sits in the coordinator's own zone), and draws at
//! random in proportion to weight. Random draws spread concurrent
//! coordinators across workers instead of stampeding the least-loaded one.
//!
//! # Components
//!
//! - **`scorer`** — Per-worker eligibility and weight, weighted draw
//! - **`selector`** — Registry-backed MC / MH-pair / MH-replacement picks

pub mod error;
pub mod scorer;
pub mod selector;

pub use error::{SelectionError, SelectionResult};
pub use scorer::{Candidate, SelectionWeights, score_worker, weighted_pick};
pub use selector::{CandidateSelector, RegionFallback, SelectionConfig};
