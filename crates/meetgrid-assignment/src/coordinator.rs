//! Coordinator — places meetings on a controller and a pair of MHs.
//!
//! `assign_meeting` is the only path that creates an assignment row:
//! - An existing row on a live controller is returned as is
//! - Otherwise up to `max_attempts` controllers are offered the meeting,
//!   each under a freshly claimed fencing generation
//! - The first acceptance is persisted with insert-if-absent, so two
//!   coordinators racing on one meeting converge on a single row
//! - An offer overtaken by a newer claim is released on its controller,
//!   costs no attempt, and the caller waits for the winner's row

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use meetgrid_cluster::ControllerClient;
use meetgrid_cluster::proto::{
    AssignMeetingRequest, MhAssignment, MhRole, RejectionReason, ReleaseMeetingRequest,
};
use meetgrid_fencing::FencingStore;
use meetgrid_placement::CandidateSelector;
use meetgrid_state::*;

use crate::error::{AssignmentError, AssignmentResult};

/// Controllers offered a meeting before giving up.
pub const MAX_ATTEMPTS: u32 = 3;

/// How long a superseded caller waits for the winning row.
pub const WINNER_WAIT: Duration = Duration::from_secs(5);

/// Overtaken offers tolerated before giving up; these cost no attempt.
const MAX_SUPERSEDED: u32 = 3;

const WINNER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The assignment coordinator of one coordinator instance.
pub struct Coordinator {
    /// This coordinator's id, recorded on every row it writes.
    id: String,
    pub(crate) state: StateStore,
    pub(crate) selector: CandidateSelector,
    fencing: Arc<dyn FencingStore>,
    controllers: Arc<dyn ControllerClient>,
    max_attempts: u32,
    winner_wait: Duration,
}

impl Coordinator {
    pub fn new(
        id: impl Into<String>,
        state: StateStore,
        selector: CandidateSelector,
        fencing: Arc<dyn FencingStore>,
        controllers: Arc<dyn ControllerClient>,
    ) -> Self {
        Self {
            id: id.into(),
            state,
            selector,
            fencing,
            controllers,
            max_attempts: MAX_ATTEMPTS,
            winner_wait: WINNER_WAIT,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_winner_wait(mut self, winner_wait: Duration) -> Self {
        self.winner_wait = winner_wait;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Assign a meeting, or return the assignment it already has.
    #[instrument(skip_all, fields(%meeting_id, %region, coordinator_id = %self.id))]
    pub async fn assign_meeting(
        &self,
        meeting_id: &str,
        region: &str,
    ) -> AssignmentResult<MeetingAssignment> {
        let mut tried: Vec<String> = Vec::new();
        let mut attempt: u32 = 0;
        let mut superseded: u32 = 0;

        while attempt < self.max_attempts && superseded < MAX_SUPERSEDED {
            if let Some(existing) = self.live_assignment(meeting_id)? {
                debug!(mc_id = %existing.mc_id, "meeting already assigned");
                return Ok(existing);
            }

            let mc = self.selector.select_mc(region, &tried)?;
            let (primary, backup) = self.selector.select_mh_pair(region)?;

            let generation = self.fencing.advance_generation(meeting_id).await?;
            let req = AssignMeetingRequest {
                meeting_id: meeting_id.to_string(),
                generation,
                mh_assignments: mh_assignments(&primary, backup.as_ref()),
                requesting_coordinator_id: self.id.clone(),
            };
            let result = self.controllers.assign_meeting(&mc.endpoint, req).await;

            // Another coordinator claimed after us: our offer is dead whatever
            // the controller said, and the winner will persist its own row.
            let current = self.fencing.current_generation(meeting_id).await?;
            if current > generation {
                superseded += 1;
                warn!(generation, current, mc_id = %mc.id, "superseded by a newer claim");
                let winner = self.await_winner(meeting_id).await?;
                let maybe_hosted = !matches!(&result, Ok(resp) if !resp.accepted);
                // The winner's controller keeps whatever generation it hosts.
                if maybe_hosted && winner.as_ref().is_none_or(|w| w.mc_id != mc.id) {
                    self.release_offer(&mc.id, &mc.endpoint, meeting_id, generation);
                }
                if let Some(winner) = winner {
                    info!(mc_id = %winner.mc_id, "returning the winning assignment");
                    return Ok(winner);
                }
                continue;
            }

            attempt += 1;
            tried.push(mc.id.clone());
            let resp = match result {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(attempt, mc_id = %mc.id, error = %e, "assign call failed");
                    self.release_offer(&mc.id, &mc.endpoint, meeting_id, generation);
                    continue;
                }
            };

            if let Some(reason) = resp.rejection() {
                warn!(attempt, mc_id = %mc.id, %reason, "controller rejected meeting");
                if reason == RejectionReason::Unhealthy {
                    if let Err(e) = self.state.set_health(&mc.id, HealthStatus::Unhealthy) {
                        warn!(mc_id = %mc.id, error = %e, "failed to mark controller unhealthy");
                    }
                }
                continue;
            }

            let row = MeetingAssignment {
                meeting_id: meeting_id.to_string(),
                region: region.to_string(),
                mc_id: mc.id.clone(),
                mh_primary_id: primary.id.clone(),
                mh_backup_id: backup.map(|b| b.id),
                generation,
                coordinator_id: self.id.clone(),
                created_at: epoch_secs(),
            };
            return match self.state.insert_assignment_if_absent(&row)? {
                InsertOutcome::Inserted => {
                    info!(attempt, mc_id = %row.mc_id, generation, "meeting assigned");
                    Ok(row)
                }
                InsertOutcome::Existing(winner) => {
                    info!(mc_id = %winner.mc_id, "lost assignment race, returning winner");
                    if winner.mc_id != mc.id {
                        self.release_offer(&mc.id, &mc.endpoint, meeting_id, generation);
                    }
                    Ok(winner)
                }
            };
        }

        warn!(attempt, superseded, tried = ?tried, "no controller accepted the meeting");
        Err(AssignmentError::ServiceUnavailable)
    }

    /// Poll for the row a newer claim is expected to persist.
    async fn await_winner(&self, meeting_id: &str) -> AssignmentResult<Option<MeetingAssignment>> {
        let deadline = Instant::now() + self.winner_wait;
        loop {
            if let Some(row) = self.state.get_assignment(meeting_id)? {
                return Ok(Some(row));
            }
            if Instant::now() >= deadline {
                debug!("no winning assignment appeared");
                return Ok(None);
            }
            tokio::time::sleep(WINNER_POLL_INTERVAL).await;
        }
    }

    /// Tell a controller, in the background, to drop an offer that did not
    /// become the meeting's assignment.
    pub(crate) fn release_offer(&self, mc_id: &str, endpoint: &str, meeting_id: &str, generation: u64) {
        let controllers = self.controllers.clone();
        let mc_id = mc_id.to_string();
        let endpoint = endpoint.to_string();
        let req = self.release_request(meeting_id, generation);
        tokio::spawn(async move {
            release_on_controller(controllers.as_ref(), &mc_id, &endpoint, req).await;
        });
    }

    pub(crate) fn release_request(&self, meeting_id: &str, generation: u64) -> ReleaseMeetingRequest {
        ReleaseMeetingRequest {
            meeting_id: meeting_id.to_string(),
            generation,
            requesting_coordinator_id: self.id.clone(),
        }
    }

    pub(crate) fn controllers(&self) -> &dyn ControllerClient {
        self.controllers.as_ref()
    }

    /// The meeting's row if its controller is still serving. A row bound
    /// to an unhealthy or vanished controller is removed.
    fn live_assignment(&self, meeting_id: &str) -> AssignmentResult<Option<MeetingAssignment>> {
        let Some(row) = self.state.get_assignment(meeting_id)? else {
            return Ok(None);
        };
        if self.controller_serving(&row.mc_id)? {
            return Ok(Some(row));
        }

        info!(mc_id = %row.mc_id, "dropping assignment to a dead controller");
        if self.state.delete_assignment_if_bound(meeting_id, &row.mc_id)? {
            return Ok(None);
        }
        // Someone else moved it first.
        match self.state.get_assignment(meeting_id)? {
            Some(row) if self.controller_serving(&row.mc_id)? => Ok(Some(row)),
            _ => Ok(None),
        }
    }

    fn controller_serving(&self, mc_id: &str) -> AssignmentResult<bool> {
        Ok(self
            .state
            .get_worker(mc_id)?
            .is_some_and(|mc| mc.health_status != HealthStatus::Unhealthy))
    }
}

/// Best-effort release; failures are logged since the controller may be gone.
pub(crate) async fn release_on_controller(
    controllers: &dyn ControllerClient,
    mc_id: &str,
    endpoint: &str,
    req: ReleaseMeetingRequest,
) -> bool {
    let meeting_id = req.meeting_id.clone();
    let generation = req.generation;
    match controllers.release_meeting(endpoint, req).await {
        Ok(resp) => {
            debug!(%mc_id, %meeting_id, generation, released = resp.released, "controller released meeting");
            resp.released
        }
        Err(e) => {
            warn!(%mc_id, %meeting_id, generation, error = %e, "meeting release not delivered");
            false
        }
    }
}

/// Wire form of a selected MH pair.
pub(crate) fn mh_assignments(
    primary: &WorkerRecord,
    backup: Option<&WorkerRecord>,
) -> Vec<MhAssignment> {
    let mut out = vec![mh_assignment(primary, MhRole::Primary)];
    if let Some(backup) = backup {
        out.push(mh_assignment(backup, MhRole::Backup));
    }
    out
}

pub(crate) fn mh_assignment(worker: &WorkerRecord, role: MhRole) -> MhAssignment {
    MhAssignment {
        mh_id: worker.id.clone(),
        media_endpoint: worker.media_endpoint.clone(),
        role,
    }
}
