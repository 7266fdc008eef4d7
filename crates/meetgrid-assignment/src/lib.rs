//! meetgrid-assignment — the coordinator's meeting placement logic.
//!
//! Binds each meeting to exactly one meeting controller (MC) and one or two
//! media handlers (MHs), and keeps that binding correct as workers fail:
//!
//! - Offers a meeting to up to three MCs in turn, each under a fresh
//!   fencing generation, and persists the first acceptance
//! - Resolves concurrent coordinators at the persistence layer with
//!   insert-if-absent
//! - Replaces a failed MH on request from the meeting's MC
//! - Moves every meeting off an MC the health checker declared dead
//! - Tells MCs to drop meetings they no longer own
//!
//! # Architecture
//!
//! ```text
//! Coordinator
//!   ├── StateStore         (worker registry, assignment rows)
//!   ├── CandidateSelector  (MC / MH pair / MH replacement picks)
//!   ├── FencingStore       (per-meeting generation claims)
//!   └── ControllerClient   (AssignMeeting / ReleaseMeeting RPCs)
//! ```

pub mod coordinator;
pub mod error;
pub mod failover;

pub use coordinator::{Coordinator, MAX_ATTEMPTS, WINNER_WAIT};
pub use error::{AssignmentError, AssignmentResult};
pub use failover::FailoverSummary;
