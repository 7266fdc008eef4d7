//! Membership manager — coordinator side of registration and heartbeats.
//!
//! Translates wire requests into worker registry operations and decides
//! which heartbeat intervals workers should use.

use std::time::Duration;

use tracing::{debug, warn};

use meetgrid_state::*;

use crate::proto::*;

/// Handles `RegisterWorker` and `Heartbeat` against the `StateStore`.
#[derive(Clone)]
pub struct MembershipManager {
    state: StateStore,
    /// Fast heartbeat interval pushed to workers on registration.
    fast_heartbeat_interval: Option<Duration>,
    /// Comprehensive heartbeat interval pushed to workers on registration.
    comprehensive_heartbeat_interval: Option<Duration>,
}

impl MembershipManager {
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            fast_heartbeat_interval: None,
            comprehensive_heartbeat_interval: None,
        }
    }

    /// Override the intervals workers use after registering.
    pub fn with_heartbeat_intervals(mut self, fast: Duration, comprehensive: Duration) -> Self {
        self.fast_heartbeat_interval = Some(fast);
        self.comprehensive_heartbeat_interval = Some(comprehensive);
        self
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Register or refresh a worker.
    ///
    /// A worker id already owned by a different kind or region fails with
    /// [`StateError::Conflict`].
    pub fn register(&self, req: RegisterWorkerRequest) -> StateResult<RegisterWorkerResponse> {
        let now = epoch_secs();
        let record = WorkerRecord {
            id: req.worker_id,
            kind: req.kind,
            region: req.region,
            zone: req.zone,
            endpoint: req.endpoint,
            media_endpoint: req.media_endpoint,
            max_capacity: req.max_capacity,
            current_load: 0,
            health_status: HealthStatus::Pending,
            resource_usage: None,
            last_heartbeat_at: now,
            registered_at: now,
        };
        self.state.register_worker(record)?;

        Ok(RegisterWorkerResponse {
            accepted: true,
            fast_heartbeat_interval_secs: self.fast_heartbeat_interval.map(|d| d.as_secs()),
            comprehensive_heartbeat_interval_secs: self
                .comprehensive_heartbeat_interval
                .map(|d| d.as_secs()),
        })
    }

    /// Apply a heartbeat. An unknown worker gets `NotFound` so it
    /// re-registers.
    pub fn heartbeat(&self, req: HeartbeatRequest) -> StateResult<HeartbeatResponse> {
        let health = req.health_status();
        match self
            .state
            .update_heartbeat(&req.worker_id, req.current_load, health, req.resource_usage)
        {
            Ok(()) => {
                debug!(worker_id = %req.worker_id, "heartbeat received");
                Ok(HeartbeatResponse {
                    status: HeartbeatStatus::Ok,
                })
            }
            Err(StateError::NotFound(_)) => {
                warn!(worker_id = %req.worker_id, "heartbeat from unknown worker");
                Ok(HeartbeatResponse {
                    status: HeartbeatStatus::NotFound,
                })
            }
            Err(e) => Err(e),
        }
    }
}
