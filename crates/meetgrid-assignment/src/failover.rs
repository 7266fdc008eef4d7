//! Recovery paths: MH replacement, MC failover, and meeting release.

use serde::Serialize;
use tracing::{info, instrument, warn};

use meetgrid_cluster::proto::{MhAssignment, MhRole, ReplacementRequest, ReplacementResponse};
use meetgrid_state::*;

use crate::coordinator::{Coordinator, mh_assignment, release_on_controller};
use crate::error::{AssignmentError, AssignmentResult};

/// Outcome of moving every meeting off one controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailoverSummary {
    pub reassigned: Vec<MeetingId>,
    pub failed: Vec<MeetingId>,
}

impl Coordinator {
    /// Pick a replacement for a failed MH of a meeting and swap it into the
    /// assignment row. Only the meeting's own controller may ask.
    #[instrument(skip_all, fields(meeting_id = %req.meeting_id, failed_mh_id = %req.failed_mh_id))]
    pub async fn request_replacement(
        &self,
        req: ReplacementRequest,
    ) -> AssignmentResult<ReplacementResponse> {
        let ReplacementRequest {
            meeting_id,
            failed_mh_id,
            requesting_mc_id,
        } = req;

        let row = self
            .state
            .get_assignment(&meeting_id)?
            .ok_or_else(|| AssignmentError::NotAssigned(meeting_id.clone()))?;
        if row.mc_id != requesting_mc_id {
            return Err(AssignmentError::NotOwner {
                meeting_id,
                mc_id: requesting_mc_id,
            });
        }
        if !row.uses_media_handler(&failed_mh_id) {
            return Err(AssignmentError::NotBound {
                meeting_id,
                mh_id: failed_mh_id,
            });
        }

        let failed_primary = row.mh_primary_id == failed_mh_id;
        let survivor = if failed_primary {
            row.mh_backup_id.clone()
        } else {
            Some(row.mh_primary_id.clone())
        };
        let survivor_zone = match &survivor {
            Some(id) => self.state.get_worker(id)?.map(|w| w.zone),
            None => None,
        };

        let mut exclude = vec![failed_mh_id.clone()];
        exclude.extend(survivor.clone());
        let replacement =
            self.selector
                .select_mh_replacement(&row.region, &exclude, survivor_zone.as_deref())?;

        let (new_primary, new_backup, role) = if failed_primary {
            (replacement.id.as_str(), row.mh_backup_id.as_deref(), MhRole::Primary)
        } else {
            (row.mh_primary_id.as_str(), Some(replacement.id.as_str()), MhRole::Backup)
        };
        self.state.replace_media_handlers(
            &meeting_id,
            &row.mh_primary_id,
            row.mh_backup_id.as_deref(),
            new_primary,
            new_backup,
        )?;

        info!(replacement_mh_id = %replacement.id, ?role, "media handler replaced");
        Ok(ReplacementResponse {
            replacement: mh_assignment(&replacement, role),
        })
    }

    /// Move every meeting off a controller that stopped serving.
    ///
    /// Each row is compare-and-deleted before reassignment, so a meeting
    /// some other coordinator already moved is left alone. The old
    /// controller is told to drop the meeting in case it is still running.
    #[instrument(skip_all, fields(%mc_id))]
    pub async fn fail_over_controller(&self, mc_id: &str) -> AssignmentResult<FailoverSummary> {
        let mut summary = FailoverSummary::default();

        for row in self.state.list_assignments_for_controller(mc_id)? {
            if !self.state.delete_assignment_if_bound(&row.meeting_id, mc_id)? {
                continue;
            }
            if let Some(old) = self.state.get_worker(mc_id)? {
                self.release_offer(mc_id, &old.endpoint, &row.meeting_id, row.generation);
            }
            match self.assign_meeting(&row.meeting_id, &row.region).await {
                Ok(moved) => {
                    info!(meeting_id = %row.meeting_id, new_mc_id = %moved.mc_id, "meeting failed over");
                    summary.reassigned.push(row.meeting_id);
                }
                Err(e) => {
                    warn!(meeting_id = %row.meeting_id, error = %e, "meeting could not be failed over");
                    summary.failed.push(row.meeting_id);
                }
            }
        }

        if !summary.reassigned.is_empty() || !summary.failed.is_empty() {
            info!(
                reassigned = summary.reassigned.len(),
                failed = summary.failed.len(),
                "controller failover finished"
            );
        }
        Ok(summary)
    }

    /// React to workers the health checker just marked unhealthy: meetings
    /// on dead controllers move elsewhere. Dead MHs are replaced when their
    /// controller asks.
    pub async fn handle_unhealthy_workers(&self, worker_ids: &[WorkerId]) {
        for id in worker_ids {
            let kind = match self.state.get_worker(id) {
                Ok(Some(worker)) => worker.kind,
                Ok(None) => continue,
                Err(e) => {
                    warn!(worker_id = %id, error = %e, "failed to load unhealthy worker");
                    continue;
                }
            };
            if kind != WorkerKind::MeetingController {
                continue;
            }
            if let Err(e) = self.fail_over_controller(id).await {
                warn!(mc_id = %id, error = %e, "controller failover failed");
            }
        }
    }

    /// Drop a meeting's assignment when the meeting ends, and tell its
    /// controller to stop hosting it.
    pub async fn release_meeting(&self, meeting_id: &str) -> AssignmentResult<bool> {
        let Some(row) = self.state.get_assignment(meeting_id)? else {
            return Ok(false);
        };
        if !self.state.delete_assignment(meeting_id)? {
            return Ok(false);
        }
        info!(%meeting_id, mc_id = %row.mc_id, "meeting released");

        match self.state.get_worker(&row.mc_id)? {
            Some(mc) => {
                let req = self.release_request(meeting_id, row.generation);
                release_on_controller(self.controllers(), &mc.id, &mc.endpoint, req).await;
            }
            None => warn!(%meeting_id, mc_id = %row.mc_id, "controller no longer registered, nothing to notify"),
        }
        Ok(true)
    }

    /// MH bindings of an assignment, as a controller would see them.
    pub fn media_handlers_of(&self, row: &MeetingAssignment) -> AssignmentResult<Vec<MhAssignment>> {
        let mut out = Vec::new();
        let bindings = std::iter::once((row.mh_primary_id.as_str(), MhRole::Primary))
            .chain(row.mh_backup_id.as_deref().map(|id| (id, MhRole::Backup)));
        for (id, role) in bindings {
            if let Some(worker) = self.state.get_worker(id)? {
                out.push(mh_assignment(&worker, role));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::tests::{ScriptedControllers, add_worker, coordinator, seeded_state};
    use std::sync::Arc;

    fn place(state: &StateStore, meeting_id: &str, mc_id: &str, primary: &str, backup: Option<&str>) {
        state
            .insert_assignment_if_absent(&MeetingAssignment {
                meeting_id: meeting_id.to_string(),
                region: "us-east".to_string(),
                mc_id: mc_id.to_string(),
                mh_primary_id: primary.to_string(),
                mh_backup_id: backup.map(str::to_string),
                generation: 1,
                coordinator_id: "gc-1".to_string(),
                created_at: 0,
            })
            .unwrap();
    }

    fn replacement(meeting_id: &str, failed: &str, mc_id: &str) -> ReplacementRequest {
        ReplacementRequest {
            meeting_id: meeting_id.to_string(),
            failed_mh_id: failed.to_string(),
            requesting_mc_id: mc_id.to_string(),
        }
    }

    #[tokio::test]
    async fn replacement_avoids_the_survivors_zone() {
        let state = seeded_state();
        add_worker(&state, "mh-c", WorkerKind::MediaHandler, "us-east-1a");
        add_worker(&state, "mh-d", WorkerKind::MediaHandler, "us-east-1c");
        place(&state, "m-1", "mc-1", "mh-a", Some("mh-b"));
        let gc = coordinator(&state, Arc::new(ScriptedControllers::default()));

        // mh-a survives in us-east-1a, so the only diverse choice is mh-d.
        let resp = gc
            .request_replacement(replacement("m-1", "mh-b", "mc-1"))
            .await
            .unwrap();
        assert_eq!(resp.replacement.mh_id, "mh-d");
        assert_eq!(resp.replacement.role, MhRole::Backup);

        let row = state.get_assignment("m-1").unwrap().unwrap();
        assert_eq!(row.mh_primary_id, "mh-a");
        assert_eq!(row.mh_backup_id.as_deref(), Some("mh-d"));
    }

    #[tokio::test]
    async fn failed_primary_is_replaced_in_place() {
        let state = seeded_state();
        add_worker(&state, "mh-d", WorkerKind::MediaHandler, "us-east-1c");
        place(&state, "m-1", "mc-1", "mh-a", Some("mh-b"));
        let gc = coordinator(&state, Arc::new(ScriptedControllers::default()));

        let resp = gc
            .request_replacement(replacement("m-1", "mh-a", "mc-1"))
            .await
            .unwrap();
        assert_eq!(resp.replacement.mh_id, "mh-d");
        assert_eq!(resp.replacement.role, MhRole::Primary);

        let row = state.get_assignment("m-1").unwrap().unwrap();
        assert_eq!(row.mh_primary_id, "mh-d");
        assert_eq!(row.mh_backup_id.as_deref(), Some("mh-b"));
    }

    #[tokio::test]
    async fn replacement_checks_ownership_and_binding() {
        let state = seeded_state();
        place(&state, "m-1", "mc-1", "mh-a", Some("mh-b"));
        let gc = coordinator(&state, Arc::new(ScriptedControllers::default()));

        let err = gc
            .request_replacement(replacement("m-1", "mh-b", "mc-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssignmentError::NotOwner { .. }));

        let err = gc
            .request_replacement(replacement("m-1", "mh-z", "mc-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssignmentError::NotBound { .. }));

        let err = gc
            .request_replacement(replacement("m-2", "mh-a", "mc-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssignmentError::NotAssigned(_)));
    }

    #[tokio::test]
    async fn no_spare_media_handler_is_service_unavailable() {
        let state = seeded_state();
        place(&state, "m-1", "mc-1", "mh-a", Some("mh-b"));
        let gc = coordinator(&state, Arc::new(ScriptedControllers::default()));

        let err = gc
            .request_replacement(replacement("m-1", "mh-b", "mc-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AssignmentError::ServiceUnavailable));
        let row = state.get_assignment("m-1").unwrap().unwrap();
        assert_eq!(row.mh_backup_id.as_deref(), Some("mh-b"));
    }

    #[tokio::test]
    async fn controller_failover_moves_meetings_without_duplicates() {
        let state = seeded_state();
        place(&state, "m-1", "mc-1", "mh-a", Some("mh-b"));
        place(&state, "m-2", "mc-1", "mh-b", Some("mh-a"));
        place(&state, "m-3", "mc-2", "mh-a", None);
        state.set_health("mc-1", HealthStatus::Unhealthy).unwrap();
        let controllers = Arc::new(ScriptedControllers::default());
        let gc = coordinator(&state, controllers.clone());

        gc.handle_unhealthy_workers(&["mc-1".to_string(), "mh-z".to_string()])
            .await;

        let rows = state.list_assignments().unwrap();
        assert_eq!(rows.len(), 3);
        assert!(state.list_assignments_for_controller("mc-1").unwrap().is_empty());
        let m3 = state.get_assignment("m-3").unwrap().unwrap();
        assert_eq!(m3.mc_id, "mc-2");
        assert_eq!(m3.generation, 1);

        let mut released: Vec<_> = controllers
            .released(2)
            .await
            .into_iter()
            .map(|(endpoint, req)| (endpoint, req.meeting_id))
            .collect();
        released.sort();
        assert_eq!(
            released,
            vec![
                ("mc-1:7000".to_string(), "m-1".to_string()),
                ("mc-1:7000".to_string(), "m-2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn failover_reports_meetings_it_could_not_place() {
        let state = StateStore::open_in_memory().unwrap();
        add_worker(&state, "mc-1", WorkerKind::MeetingController, "us-east-1a");
        add_worker(&state, "mh-a", WorkerKind::MediaHandler, "us-east-1a");
        place(&state, "m-1", "mc-1", "mh-a", None);
        state.set_health("mc-1", HealthStatus::Unhealthy).unwrap();
        let controllers = Arc::new(ScriptedControllers::default());
        let gc = coordinator(&state, controllers.clone());

        let summary = gc.fail_over_controller("mc-1").await.unwrap();
        assert_eq!(summary.failed, vec!["m-1".to_string()]);
        assert!(summary.reassigned.is_empty());
        assert!(state.get_assignment("m-1").unwrap().is_none());

        // The old controller is still told to drop the meeting.
        let released = controllers.released(1).await;
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].0, "mc-1:7000");
    }

    #[tokio::test]
    async fn release_removes_the_row_and_notifies_the_controller() {
        let state = seeded_state();
        place(&state, "m-1", "mc-1", "mh-a", Some("mh-b"));
        let controllers = Arc::new(ScriptedControllers::default());
        let gc = coordinator(&state, controllers.clone());

        assert!(gc.release_meeting("m-1").await.unwrap());
        assert!(!gc.release_meeting("m-1").await.unwrap());
        assert!(state.get_assignment("m-1").unwrap().is_none());

        let released = controllers.releases.lock().unwrap().clone();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].0, "mc-1:7000");
        assert_eq!(released[0].1.meeting_id, "m-1");
        assert_eq!(released[0].1.generation, 1);
    }

    #[test]
    fn media_handlers_of_lists_roles() {
        let state = seeded_state();
        place(&state, "m-1", "mc-1", "mh-a", Some("mh-b"));
        let gc = coordinator(&state, Arc::new(ScriptedControllers::default()));

        let row = state.get_assignment("m-1").unwrap().unwrap();
        let mhs = gc.media_handlers_of(&row).unwrap();
        assert_eq!(mhs.len(), 2);
        assert_eq!(mhs[0].role, MhRole::Primary);
        assert_eq!(mhs[1].mh_id, "mh-b");
        assert_eq!(mhs[1].media_endpoint.as_deref(), Some("mh-b.media:443"));
    }
}
