//! Wire types for the meetgrid RPC surface.
//!
//! Every RPC is a JSON `POST` to a fixed route. Health travels as an
//! integer code (see [`HealthStatus::code`]) and rejection reasons as
//! [`RejectionReason`] codes.

use meetgrid_state::{HealthStatus, ResourceUsage, WorkerKind};
use serde::{Deserialize, Serialize};

pub const REGISTER_WORKER_PATH: &str = "/rpc/v1/workers/register";
pub const HEARTBEAT_PATH: &str = "/rpc/v1/workers/heartbeat";
pub const ASSIGN_MEETING_PATH: &str = "/rpc/v1/meetings/assign";
pub const REQUEST_REPLACEMENT_PATH: &str = "/rpc/v1/meetings/replacement";
pub const RELEASE_MEETING_PATH: &str = "/rpc/v1/meetings/release";

// ── Registration ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterWorkerRequest {
    pub worker_id: String,
    pub kind: WorkerKind,
    pub region: String,
    pub zone: String,
    /// RPC endpoint (host:port) the coordinator calls back on.
    pub endpoint: String,
    pub media_endpoint: Option<String>,
    pub max_capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterWorkerResponse {
    pub accepted: bool,
    /// Coordinator override of the fast heartbeat interval.
    pub fast_heartbeat_interval_secs: Option<u64>,
    /// Coordinator override of the comprehensive heartbeat interval.
    pub comprehensive_heartbeat_interval_secs: Option<u64>,
}

// ── Heartbeat ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub current_load: u32,
    /// [`HealthStatus`] wire code.
    pub health: i32,
    /// Present on comprehensive heartbeats only.
    pub resource_usage: Option<ResourceUsage>,
}

impl HeartbeatRequest {
    pub fn health_status(&self) -> HealthStatus {
        HealthStatus::from_code(self.health)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    Ok,
    /// The coordinator has no row for this worker; re-register.
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub status: HeartbeatStatus,
}

// ── Assignment ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MhRole {
    Primary,
    Backup,
}

/// A media handler the controller should bind the meeting to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MhAssignment {
    pub mh_id: String,
    pub media_endpoint: Option<String>,
    pub role: MhRole,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignMeetingRequest {
    pub meeting_id: String,
    /// Fencing generation claimed for this offer.
    pub generation: u64,
    pub mh_assignments: Vec<MhAssignment>,
    pub requesting_coordinator_id: String,
}

/// Why a controller refused a meeting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionReason {
    Unspecified,
    AtCapacity,
    Draining,
    Unhealthy,
}

impl RejectionReason {
    pub fn code(self) -> i32 {
        match self {
            RejectionReason::Unspecified => 0,
            RejectionReason::AtCapacity => 1,
            RejectionReason::Draining => 2,
            RejectionReason::Unhealthy => 3,
        }
    }

    /// Unknown codes decode to `Unspecified`.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => RejectionReason::AtCapacity,
            2 => RejectionReason::Draining,
            3 => RejectionReason::Unhealthy,
            _ => RejectionReason::Unspecified,
        }
    }
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectionReason::Unspecified => "unspecified",
            RejectionReason::AtCapacity => "at_capacity",
            RejectionReason::Draining => "draining",
            RejectionReason::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignMeetingResponse {
    pub accepted: bool,
    /// [`RejectionReason`] code; ignored when accepted.
    pub rejection_reason: i32,
}

impl AssignMeetingResponse {
    pub fn accepted() -> Self {
        Self {
            accepted: true,
            rejection_reason: RejectionReason::Unspecified.code(),
        }
    }

    pub fn rejected(reason: RejectionReason) -> Self {
        Self {
            accepted: false,
            rejection_reason: reason.code(),
        }
    }

    /// `None` when accepted.
    pub fn rejection(&self) -> Option<RejectionReason> {
        (!self.accepted).then(|| RejectionReason::from_code(self.rejection_reason))
    }
}

/// Tells a controller to stop hosting a meeting it was offered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseMeetingRequest {
    pub meeting_id: String,
    /// Hosted copies at this generation or older are dropped; newer ones stay.
    pub generation: u64,
    pub requesting_coordinator_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseMeetingResponse {
    /// `false` when nothing at or below the generation was hosted.
    pub released: bool,
}

// ── MH replacement ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacementRequest {
    pub meeting_id: String,
    pub failed_mh_id: String,
    pub requesting_mc_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplacementResponse {
    pub replacement: MhAssignment,
}
