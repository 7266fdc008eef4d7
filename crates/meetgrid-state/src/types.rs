//! Domain types for the meetgrid state store.
//!
//! These types represent the persisted state of workers (meeting
//! controllers and media handlers), meeting assignments, and fenced
//! per-meeting values. All types are serializable to/from JSON for
//! storage in redb tables.

use serde::{Deserialize, Serialize};

/// Stable identifier of a worker (MC or MH).
pub type WorkerId = String;

/// Identifier of a meeting.
pub type MeetingId = String;

// ── Workers ───────────────────────────────────────────────────────

/// Which kind of worker a registry row describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// Hosts live meeting sessions.
    MeetingController,
    /// Relays media streams for a meeting.
    MediaHandler,
}

impl WorkerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::MeetingController => "meeting_controller",
            WorkerKind::MediaHandler => "media_handler",
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health of a worker as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Registered, no heartbeat yet.
    Pending,
    Healthy,
    /// Serving, but reporting reduced capacity.
    Degraded,
    Unhealthy,
    /// Finishing existing work, accepting none. Not a failure state.
    Draining,
}

impl HealthStatus {
    /// Integer code used on the wire.
    pub fn code(self) -> i32 {
        match self {
            HealthStatus::Pending => 1,
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 3,
            HealthStatus::Unhealthy => 4,
            HealthStatus::Draining => 5,
        }
    }

    /// Decode a wire code.
    ///
    /// Unknown or unspecified codes decode to `Unhealthy` for every worker
    /// kind (fail-closed): a worker reporting garbage is never selected.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => HealthStatus::Pending,
            2 => HealthStatus::Healthy,
            3 => HealthStatus::Degraded,
            4 => HealthStatus::Unhealthy,
            5 => HealthStatus::Draining,
            _ => HealthStatus::Unhealthy,
        }
    }

    /// Whether the worker is still serving the work it already has.
    pub fn is_serving(self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

/// Resource utilization reported by the comprehensive heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ResourceUsage {
    /// CPU utilization, 0.0–100.0.
    pub cpu_percent: f64,
    /// Memory utilization, 0.0–100.0.
    pub memory_percent: f64,
}

/// A registered worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub kind: WorkerKind,
    pub region: String,
    pub zone: String,
    /// RPC endpoint the coordinator calls (host:port).
    pub endpoint: String,
    /// Client-facing media endpoint (media handlers only).
    pub media_endpoint: Option<String>,
    /// Meetings (MC) or streams (MH) this worker can host.
    pub max_capacity: u32,
    /// Meetings (MC) or streams (MH) currently hosted. May exceed
    /// `max_capacity` while draining.
    pub current_load: u32,
    pub health_status: HealthStatus,
    /// Last comprehensive heartbeat resource report.
    pub resource_usage: Option<ResourceUsage>,
    /// Unix timestamp (seconds) of the last heartbeat or registration.
    pub last_heartbeat_at: u64,
    /// Unix timestamp (seconds) of the first registration.
    pub registered_at: u64,
}

impl WorkerRecord {
    /// Fraction of capacity in use. A zero-capacity worker is full.
    pub fn load_ratio(&self) -> f64 {
        if self.max_capacity == 0 {
            return 1.0;
        }
        f64::from(self.current_load) / f64::from(self.max_capacity)
    }

    /// Whether the worker can take one more unit of work.
    pub fn has_headroom(&self) -> bool {
        self.current_load < self.max_capacity
    }
}

// ── Assignments ───────────────────────────────────────────────────

/// The durable binding of a meeting to one MC and one or two MHs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeetingAssignment {
    pub meeting_id: MeetingId,
    pub region: String,
    pub mc_id: WorkerId,
    pub mh_primary_id: WorkerId,
    pub mh_backup_id: Option<WorkerId>,
    /// Fencing generation the MC was handed when it accepted.
    pub generation: u64,
    /// Coordinator instance that wrote the row.
    pub coordinator_id: String,
    /// Unix timestamp (seconds) when the row was written.
    pub created_at: u64,
}

impl MeetingAssignment {
    /// Whether the given MH is bound to this meeting.
    pub fn uses_media_handler(&self, mh_id: &str) -> bool {
        self.mh_primary_id == mh_id || self.mh_backup_id.as_deref() == Some(mh_id)
    }
}

/// Result of an insert-if-absent on the assignments table.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    /// Our row is now the live assignment.
    Inserted,
    /// Another writer got there first; this is their row.
    Existing(MeetingAssignment),
}

/// Result of registering a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// First time this id was seen.
    Created,
    /// The id was already known; endpoints and capacity were refreshed.
    Refreshed,
}

// ── Fencing ───────────────────────────────────────────────────────

/// A value written under a meeting's fencing generation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FencedValue {
    pub value: String,
    pub generation: u64,
    pub writer_id: String,
    pub written_at: u64,
}

/// Result of a fenced write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceOutcome {
    Accepted,
    /// The presented generation is older than the stored one.
    FencedOut { current: u64 },
}

/// Composite key for a fenced value: `{meeting_id}/{field}`.
pub fn fenced_value_key(meeting_id: &str, field: &str) -> String {
    format!("{meeting_id}/{field}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_codes_round_trip_known_values() {
        for status in [
            HealthStatus::Pending,
            HealthStatus::Healthy,
            HealthStatus::Degraded,
            HealthStatus::Unhealthy,
            HealthStatus::Draining,
        ] {
            assert_eq!(HealthStatus::from_code(status.code()), status);
        }
    }

    #[test]
    fn unknown_health_code_is_fail_closed() {
        assert_eq!(HealthStatus::from_code(0), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::from_code(42), HealthStatus::Unhealthy);
        assert_eq!(HealthStatus::from_code(-1), HealthStatus::Unhealthy);
    }

    #[test]
    fn zero_capacity_is_full() {
        let record = WorkerRecord {
            id: "mc-1".to_string(),
            kind: WorkerKind::MeetingController,
            region: "us-east".to_string(),
            zone: "a".to_string(),
            endpoint: "10.0.0.1:7000".to_string(),
            media_endpoint: None,
            max_capacity: 0,
            current_load: 0,
            health_status: HealthStatus::Healthy,
            resource_usage: None,
            last_heartbeat_at: 0,
            registered_at: 0,
        };
        assert_eq!(record.load_ratio(), 1.0);
        assert!(!record.has_headroom());
    }
}
