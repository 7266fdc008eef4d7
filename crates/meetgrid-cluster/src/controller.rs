//! Meeting controller side of the assignment protocol.
//!
//! The coordinator offers a meeting with `AssignMeeting`; the controller
//! accepts only when it has room, is not draining and is healthy. Accepted
//! meetings live in a single-owner meeting-host task that holds one
//! [`MeetingFence`] per meeting, so every write of meeting state presents
//! the generation the coordinator handed out.
//!
//! # Architecture
//!
//! ```text
//! MeetingController
//!   ├── assign_meeting()        — admission checks, then Create → host
//!   ├── release_meeting()       — coordinator gave the meeting away, Release → host
//!   ├── replace_media_handler() — RequestReplacement → coordinator, then Replace → host
//!   └── MeetingHostHandle ── mpsc ──▶ host task
//!                                      └── HashMap<meeting_id, HostedMeeting{fence, mh}>
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use meetgrid_fencing::{FencingError, FencingStore, MeetingFence};
use meetgrid_state::HealthStatus;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::{LoadReporter, LoadSnapshot};
use crate::auth::{Authorizer, Scope, authorize_headers};
use crate::client::CoordinatorClient;
use crate::error::RpcError;
use crate::proto::*;
use crate::usage::SystemUsage;

/// Participants budgeted per hosted meeting for admission.
pub const ESTIMATED_PARTICIPANTS_PER_MEETING: u32 = 10;

/// Fenced field holding the meeting's MH bindings.
pub const MH_BINDINGS_FIELD: &str = "mh_assignments";

#[derive(Debug, Clone, Copy)]
pub struct ControllerCapacity {
    pub max_meetings: u32,
    pub max_participants: u32,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("meeting {0} is not hosted here")]
    UnknownMeeting(String),

    #[error("fenced out of meeting {0}")]
    FencedOut(String),

    #[error("fencing store failure: {0}")]
    Store(String),

    #[error("coordinator call failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("no coordinator client configured")]
    NoCoordinator,

    #[error("meeting host stopped")]
    HostStopped,
}

impl From<FencingError> for ControllerError {
    fn from(e: FencingError) -> Self {
        match e {
            FencingError::FencedOut { meeting_id, .. } => ControllerError::FencedOut(meeting_id),
            other => ControllerError::Store(other.to_string()),
        }
    }
}

// ── Meeting host task ─────────────────────────────────────────────

/// Public view of a hosted meeting.
#[derive(Debug, Clone, PartialEq)]
pub struct HostedMeetingInfo {
    pub meeting_id: String,
    pub generation: u64,
    pub mh_assignments: Vec<MhAssignment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostStats {
    pub meetings: u32,
    /// Estimated from the meeting count.
    pub participants: u32,
}

struct HostedMeeting {
    fence: MeetingFence,
    mh_assignments: Vec<MhAssignment>,
}

impl HostedMeeting {
    fn info(&self) -> HostedMeetingInfo {
        HostedMeetingInfo {
            meeting_id: self.fence.meeting_id().to_string(),
            generation: self.fence.generation(),
            mh_assignments: self.mh_assignments.clone(),
        }
    }
}

enum HostCommand {
    Create {
        meeting_id: String,
        generation: u64,
        mh_assignments: Vec<MhAssignment>,
        reply: oneshot::Sender<Result<(), ControllerError>>,
    },
    ReplaceMediaHandler {
        meeting_id: String,
        failed_mh_id: String,
        replacement: MhAssignment,
        reply: oneshot::Sender<Result<(), ControllerError>>,
    },
    Release {
        meeting_id: String,
        generation: u64,
        reply: oneshot::Sender<bool>,
    },
    Get {
        meeting_id: String,
        reply: oneshot::Sender<Option<HostedMeetingInfo>>,
    },
    Stats {
        reply: oneshot::Sender<HostStats>,
    },
}

/// Handle to the meeting-host task.
#[derive(Clone)]
pub struct MeetingHostHandle {
    tx: mpsc::Sender<HostCommand>,
}

impl MeetingHostHandle {
    /// Spawn the host task. It stops when `cancel` fires or every handle
    /// is dropped.
    pub fn spawn(
        fencing: Arc<dyn FencingStore>,
        writer_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let host = MeetingHost {
            fencing,
            writer_id: writer_id.into(),
            meetings: HashMap::new(),
        };
        tokio::spawn(host.run(rx, cancel));
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HostCommand,
    ) -> Result<T, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| ControllerError::HostStopped)?;
        rx.await.map_err(|_| ControllerError::HostStopped)
    }

    pub async fn create(
        &self,
        meeting_id: &str,
        generation: u64,
        mh_assignments: Vec<MhAssignment>,
    ) -> Result<(), ControllerError> {
        self.request(|reply| HostCommand::Create {
            meeting_id: meeting_id.to_string(),
            generation,
            mh_assignments,
            reply,
        })
        .await?
    }

    pub async fn replace_media_handler(
        &self,
        meeting_id: &str,
        failed_mh_id: &str,
        replacement: MhAssignment,
    ) -> Result<(), ControllerError> {
        self.request(|reply| HostCommand::ReplaceMediaHandler {
            meeting_id: meeting_id.to_string(),
            failed_mh_id: failed_mh_id.to_string(),
            replacement,
            reply,
        })
        .await?
    }

    /// Drop the meeting if it is hosted at `generation` or older.
    pub async fn release(&self, meeting_id: &str, generation: u64) -> Result<bool, ControllerError> {
        self.request(|reply| HostCommand::Release {
            meeting_id: meeting_id.to_string(),
            generation,
            reply,
        })
        .await
    }

    pub async fn get(&self, meeting_id: &str) -> Result<Option<HostedMeetingInfo>, ControllerError> {
        self.request(|reply| HostCommand::Get {
            meeting_id: meeting_id.to_string(),
            reply,
        })
        .await
    }

    pub async fn stats(&self) -> Result<HostStats, ControllerError> {
        self.request(|reply| HostCommand::Stats { reply }).await
    }
}

struct MeetingHost {
    fencing: Arc<dyn FencingStore>,
    writer_id: String,
    meetings: HashMap<String, HostedMeeting>,
}

impl MeetingHost {
    async fn run(mut self, mut rx: mpsc::Receiver<HostCommand>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd).await,
                    None => break,
                },
            }
        }
        debug!(writer_id = %self.writer_id, meetings = self.meetings.len(), "meeting host stopped");
    }

    async fn handle(&mut self, cmd: HostCommand) {
        match cmd {
            HostCommand::Create {
                meeting_id,
                generation,
                mh_assignments,
                reply,
            } => {
                let _ = reply.send(self.create(meeting_id, generation, mh_assignments).await);
            }
            HostCommand::ReplaceMediaHandler {
                meeting_id,
                failed_mh_id,
                replacement,
                reply,
            } => {
                let _ = reply.send(
                    self.replace_media_handler(&meeting_id, &failed_mh_id, replacement)
                        .await,
                );
            }
            HostCommand::Release {
                meeting_id,
                generation,
                reply,
            } => {
                let releasable = self
                    .meetings
                    .get(&meeting_id)
                    .is_some_and(|m| m.fence.generation() <= generation);
                if releasable {
                    self.meetings.remove(&meeting_id);
                    info!(%meeting_id, generation, "meeting released");
                }
                let _ = reply.send(releasable);
            }
            HostCommand::Get { meeting_id, reply } => {
                let _ = reply.send(self.meetings.get(&meeting_id).map(HostedMeeting::info));
            }
            HostCommand::Stats { reply } => {
                let meetings = self.meetings.len() as u32;
                let _ = reply.send(HostStats {
                    meetings,
                    participants: meetings.saturating_mul(ESTIMATED_PARTICIPANTS_PER_MEETING),
                });
            }
        }
    }

    async fn create(
        &mut self,
        meeting_id: String,
        generation: u64,
        mh_assignments: Vec<MhAssignment>,
    ) -> Result<(), ControllerError> {
        if let Some(existing) = self.meetings.get(&meeting_id) {
            if existing.fence.generation() > generation {
                return Err(ControllerError::FencedOut(meeting_id));
            }
        }

        let mut fence = MeetingFence::new(
            self.fencing.clone(),
            meeting_id.clone(),
            self.writer_id.clone(),
            generation,
        );
        let bindings = encode_bindings(&mh_assignments)?;
        if let Err(e) = fence.write(MH_BINDINGS_FIELD, &bindings).await {
            let err = ControllerError::from(e);
            // A store hiccup leaves a hosted copy in place; only a newer claim evicts it.
            if matches!(err, ControllerError::FencedOut(_)) {
                self.meetings.remove(&meeting_id);
            }
            return Err(err);
        }

        self.meetings.insert(
            meeting_id.clone(),
            HostedMeeting {
                fence,
                mh_assignments,
            },
        );
        info!(%meeting_id, generation, "meeting hosted");
        Ok(())
    }

    async fn replace_media_handler(
        &mut self,
        meeting_id: &str,
        failed_mh_id: &str,
        replacement: MhAssignment,
    ) -> Result<(), ControllerError> {
        let meeting = self
            .meetings
            .get_mut(meeting_id)
            .ok_or_else(|| ControllerError::UnknownMeeting(meeting_id.to_string()))?;

        let mut updated = meeting.mh_assignments.clone();
        match updated.iter_mut().find(|mh| mh.mh_id == failed_mh_id) {
            Some(slot) => {
                let role = slot.role;
                *slot = MhAssignment { role, ..replacement };
            }
            None => updated.push(replacement),
        }

        let bindings = encode_bindings(&updated)?;
        match meeting.fence.write(MH_BINDINGS_FIELD, &bindings).await {
            Ok(()) => {
                meeting.mh_assignments = updated;
                info!(%meeting_id, %failed_mh_id, "media handler replaced");
                Ok(())
            }
            Err(e) => {
                let err = ControllerError::from(e);
                if matches!(err, ControllerError::FencedOut(_)) {
                    warn!(%meeting_id, "fenced out during media handler replacement, abandoning meeting");
                    self.meetings.remove(meeting_id);
                }
                Err(err)
            }
        }
    }
}

fn encode_bindings(mh_assignments: &[MhAssignment]) -> Result<String, ControllerError> {
    serde_json::to_string(mh_assignments).map_err(|e| ControllerError::Store(e.to_string()))
}

// ── Controller service ────────────────────────────────────────────

/// The assignment service of one meeting controller.
pub struct MeetingController {
    id: String,
    capacity: ControllerCapacity,
    host: MeetingHostHandle,
    coordinator: Option<Arc<dyn CoordinatorClient>>,
    usage: SystemUsage,
    draining: AtomicBool,
    health: AtomicI32,
}

impl MeetingController {
    pub fn new(id: impl Into<String>, capacity: ControllerCapacity, host: MeetingHostHandle) -> Self {
        Self {
            id: id.into(),
            capacity,
            host,
            coordinator: None,
            usage: SystemUsage::new(),
            draining: AtomicBool::new(false),
            health: AtomicI32::new(HealthStatus::Healthy.code()),
        }
    }

    /// Client used for `RequestReplacement`.
    pub fn with_coordinator(mut self, coordinator: Arc<dyn CoordinatorClient>) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn host(&self) -> &MeetingHostHandle {
        &self.host
    }

    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::SeqCst);
        info!(mc_id = %self.id, draining, "drain flag changed");
    }

    pub fn set_health(&self, health: HealthStatus) {
        self.health.store(health.code(), Ordering::SeqCst);
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus::from_code(self.health.load(Ordering::SeqCst))
    }

    /// Decide on a meeting offer.
    pub async fn assign_meeting(&self, req: AssignMeetingRequest) -> AssignMeetingResponse {
        let meeting_id = req.meeting_id.clone();

        if let Err(reason) = self.admit(&meeting_id).await {
            info!(
                mc_id = %self.id,
                %meeting_id,
                coordinator = %req.requesting_coordinator_id,
                %reason,
                "meeting rejected"
            );
            return AssignMeetingResponse::rejected(reason);
        }

        match self
            .host
            .create(&meeting_id, req.generation, req.mh_assignments)
            .await
        {
            Ok(()) => {
                info!(mc_id = %self.id, %meeting_id, generation = req.generation, "meeting accepted");
                AssignMeetingResponse::accepted()
            }
            Err(ControllerError::FencedOut(_)) => {
                warn!(mc_id = %self.id, %meeting_id, generation = req.generation, "offer carries a stale generation");
                AssignMeetingResponse::rejected(RejectionReason::Unspecified)
            }
            Err(e) => {
                warn!(mc_id = %self.id, %meeting_id, error = %e, "could not persist meeting state");
                AssignMeetingResponse::rejected(RejectionReason::Unhealthy)
            }
        }
    }

    /// Admission checks, draining first.
    async fn admit(&self, meeting_id: &str) -> Result<(), RejectionReason> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(RejectionReason::Draining);
        }
        if !matches!(self.health(), HealthStatus::Healthy | HealthStatus::Degraded) {
            return Err(RejectionReason::Unhealthy);
        }

        // A re-offer of a meeting we already host needs no extra room.
        let already_hosted = self
            .host
            .get(meeting_id)
            .await
            .map_err(|_| RejectionReason::Unhealthy)?
            .is_some();
        if already_hosted {
            return Ok(());
        }

        let stats = self
            .host
            .stats()
            .await
            .map_err(|_| RejectionReason::Unhealthy)?;
        if stats.meetings >= self.capacity.max_meetings {
            return Err(RejectionReason::AtCapacity);
        }
        if stats
            .participants
            .saturating_add(ESTIMATED_PARTICIPANTS_PER_MEETING)
            > self.capacity.max_participants
        {
            return Err(RejectionReason::AtCapacity);
        }
        Ok(())
    }

    /// Ask the coordinator for a replacement of a failed MH and bind it
    /// under this meeting's fence.
    pub async fn replace_media_handler(
        &self,
        meeting_id: &str,
        failed_mh_id: &str,
    ) -> Result<MhAssignment, ControllerError> {
        let coordinator = self.coordinator.as_ref().ok_or(ControllerError::NoCoordinator)?;
        if self.host.get(meeting_id).await?.is_none() {
            return Err(ControllerError::UnknownMeeting(meeting_id.to_string()));
        }

        let resp = coordinator
            .request_replacement(ReplacementRequest {
                meeting_id: meeting_id.to_string(),
                failed_mh_id: failed_mh_id.to_string(),
                requesting_mc_id: self.id.clone(),
            })
            .await?;
        self.host
            .replace_media_handler(meeting_id, failed_mh_id, resp.replacement.clone())
            .await?;
        Ok(resp.replacement)
    }

    /// Stop hosting a meeting the coordinator released or gave to another controller.
    pub async fn release_meeting(&self, req: ReleaseMeetingRequest) -> ReleaseMeetingResponse {
        let released = match self.host.release(&req.meeting_id, req.generation).await {
            Ok(released) => released,
            Err(e) => {
                warn!(mc_id = %self.id, meeting_id = %req.meeting_id, error = %e, "release failed");
                false
            }
        };
        debug!(
            mc_id = %self.id,
            meeting_id = %req.meeting_id,
            generation = req.generation,
            coordinator = %req.requesting_coordinator_id,
            released,
            "release handled"
        );
        ReleaseMeetingResponse { released }
    }
}

#[async_trait]
impl LoadReporter for MeetingController {
    async fn snapshot(&self) -> LoadSnapshot {
        match self.host.stats().await {
            Ok(stats) => LoadSnapshot {
                current_load: stats.meetings,
                health: self.health(),
                resource_usage: Some(self.usage.sample()),
            },
            Err(e) => {
                warn!(mc_id = %self.id, error = %e, "meeting host unavailable");
                LoadSnapshot {
                    current_load: 0,
                    health: HealthStatus::Unhealthy,
                    resource_usage: Some(self.usage.sample()),
                }
            }
        }
    }
}

// ── HTTP surface ──────────────────────────────────────────────────

#[derive(Clone)]
pub struct ControllerState {
    pub controller: Arc<MeetingController>,
    pub authorizer: Arc<dyn Authorizer>,
}

/// Routes served by a meeting controller.
pub fn controller_router(state: ControllerState) -> Router {
    Router::new()
        .route(ASSIGN_MEETING_PATH, post(assign_meeting_handler))
        .route(RELEASE_MEETING_PATH, post(release_meeting_handler))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// POST /rpc/v1/meetings/assign
async fn assign_meeting_handler(
    State(state): State<ControllerState>,
    headers: HeaderMap,
    Json(req): Json<AssignMeetingRequest>,
) -> impl IntoResponse {
    if authorize_headers(&headers, state.authorizer.as_ref(), Scope::MeetingAssign).is_none() {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    Json(state.controller.assign_meeting(req).await).into_response()
}

/// POST /rpc/v1/meetings/release
async fn release_meeting_handler(
    State(state): State<ControllerState>,
    headers: HeaderMap,
    Json(req): Json<ReleaseMeetingRequest>,
) -> impl IntoResponse {
    if authorize_headers(&headers, state.authorizer.as_ref(), Scope::MeetingAssign).is_none() {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }
    Json(state.controller.release_meeting(req).await).into_response()
}

/// GET /healthz
async fn healthz(State(state): State<ControllerState>) -> impl IntoResponse {
    match state.controller.health() {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AllowAll, HmacAuthorizer, MasterSecret};
    use crate::error::RpcResult;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use meetgrid_state::{StateError, StateStore};
    use tower::ServiceExt;

    fn mh(id: &str, role: MhRole) -> MhAssignment {
        MhAssignment {
            mh_id: id.to_string(),
            media_endpoint: Some(format!("{id}.media:443")),
            role,
        }
    }

    fn offer(meeting_id: &str, generation: u64) -> AssignMeetingRequest {
        AssignMeetingRequest {
            meeting_id: meeting_id.to_string(),
            generation,
            mh_assignments: vec![mh("mh-a", MhRole::Primary), mh("mh-b", MhRole::Backup)],
            requesting_coordinator_id: "gc-1".to_string(),
        }
    }

    fn release(meeting_id: &str, generation: u64) -> ReleaseMeetingRequest {
        ReleaseMeetingRequest {
            meeting_id: meeting_id.to_string(),
            generation,
            requesting_coordinator_id: "gc-1".to_string(),
        }
    }

    fn controller(state: &StateStore, max_meetings: u32, max_participants: u32) -> MeetingController {
        let host = MeetingHostHandle::spawn(
            Arc::new(state.clone()),
            "mc-1",
            CancellationToken::new(),
        );
        MeetingController::new(
            "mc-1",
            ControllerCapacity {
                max_meetings,
                max_participants,
            },
            host,
        )
    }

    #[tokio::test]
    async fn accepts_and_writes_fenced_bindings() {
        let state = StateStore::open_in_memory().unwrap();
        let mc = controller(&state, 10, 1000);
        let generation = state.advance_generation("m-1").unwrap();

        let resp = mc.assign_meeting(offer("m-1", generation)).await;
        assert!(resp.accepted);

        let stored = state.read_fenced("m-1", MH_BINDINGS_FIELD).unwrap().unwrap();
        assert_eq!(stored.writer_id, "mc-1");
        assert_eq!(stored.generation, generation);
        let bindings: Vec<MhAssignment> = serde_json::from_str(&stored.value).unwrap();
        assert_eq!(bindings.len(), 2);

        let hosted = mc.host().get("m-1").await.unwrap().unwrap();
        assert_eq!(hosted.generation, generation);
    }

    #[tokio::test]
    async fn draining_is_checked_first() {
        let state = StateStore::open_in_memory().unwrap();
        let mc = controller(&state, 0, 0);
        mc.set_draining(true);
        let resp = mc.assign_meeting(offer("m-1", 1)).await;
        assert_eq!(resp.rejection(), Some(RejectionReason::Draining));
    }

    #[tokio::test]
    async fn meeting_capacity_rejects() {
        let state = StateStore::open_in_memory().unwrap();
        let mc = controller(&state, 1, 1000);
        assert!(mc.assign_meeting(offer("m-1", 1)).await.accepted);

        let resp = mc.assign_meeting(offer("m-2", 1)).await;
        assert_eq!(resp.rejection(), Some(RejectionReason::AtCapacity));
    }

    #[tokio::test]
    async fn participant_headroom_rejects() {
        let state = StateStore::open_in_memory().unwrap();
        let mc = controller(&state, 100, 25);
        assert!(mc.assign_meeting(offer("m-1", 1)).await.accepted);
        // 10 estimated + 10 more = 20 <= 25.
        assert!(mc.assign_meeting(offer("m-2", 1)).await.accepted);
        // 20 + 10 > 25.
        let resp = mc.assign_meeting(offer("m-3", 1)).await;
        assert_eq!(resp.rejection(), Some(RejectionReason::AtCapacity));
        assert_eq!(mc.host().stats().await.unwrap().participants, 20);

        // Releasing a meeting returns its headroom.
        assert!(mc.release_meeting(release("m-1", 1)).await.released);
        assert!(mc.assign_meeting(offer("m-3", 1)).await.accepted);
    }

    #[tokio::test]
    async fn released_meeting_frees_capacity() {
        let state = StateStore::open_in_memory().unwrap();
        let mc = controller(&state, 1, 1000);
        let first = state.advance_generation("m-1").unwrap();
        assert!(mc.assign_meeting(offer("m-1", first)).await.accepted);
        assert_eq!(
            mc.assign_meeting(offer("m-2", 1)).await.rejection(),
            Some(RejectionReason::AtCapacity)
        );

        assert!(mc.release_meeting(release("m-1", first)).await.released);
        assert!(mc.host().get("m-1").await.unwrap().is_none());
        assert!(mc.assign_meeting(offer("m-2", 1)).await.accepted);
    }

    #[tokio::test]
    async fn release_keeps_a_newer_hosted_generation() {
        let state = StateStore::open_in_memory().unwrap();
        let mc = controller(&state, 10, 1000);
        state.advance_generation("m-1").unwrap();
        let second = state.advance_generation("m-1").unwrap();
        assert!(mc.assign_meeting(offer("m-1", second)).await.accepted);

        // A release for the older offer must not drop the newer one.
        assert!(!mc.release_meeting(release("m-1", second - 1)).await.released);
        assert!(mc.host().get("m-1").await.unwrap().is_some());
        assert!(!mc.release_meeting(release("m-unknown", 5)).await.released);
    }

    /// Fencing store whose writes fail with a store error while `failing` is set.
    struct FlakyFencing {
        inner: StateStore,
        failing: AtomicBool,
    }

    #[async_trait]
    impl FencingStore for FlakyFencing {
        async fn advance_generation(&self, meeting_id: &str) -> meetgrid_fencing::FencingResult<u64> {
            FencingStore::advance_generation(&self.inner, meeting_id).await
        }

        async fn current_generation(&self, meeting_id: &str) -> meetgrid_fencing::FencingResult<u64> {
            FencingStore::current_generation(&self.inner, meeting_id).await
        }

        async fn fenced_write(
            &self,
            meeting_id: &str,
            field: &str,
            value: &str,
            generation: u64,
            writer_id: &str,
        ) -> meetgrid_fencing::FencingResult<meetgrid_fencing::FenceOutcome> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(FencingError::State(StateError::Write("disk full".to_string())));
            }
            FencingStore::fenced_write(&self.inner, meeting_id, field, value, generation, writer_id)
                .await
        }

        async fn read_fenced(
            &self,
            meeting_id: &str,
            field: &str,
        ) -> meetgrid_fencing::FencingResult<Option<meetgrid_fencing::FencedValue>> {
            FencingStore::read_fenced(&self.inner, meeting_id, field).await
        }
    }

    #[tokio::test]
    async fn store_error_on_re_offer_keeps_hosted_meeting() {
        let state = StateStore::open_in_memory().unwrap();
        let fencing = Arc::new(FlakyFencing {
            inner: state.clone(),
            failing: AtomicBool::new(false),
        });
        let host = MeetingHostHandle::spawn(fencing.clone(), "mc-1", CancellationToken::new());
        let first = state.advance_generation("m-1").unwrap();
        host.create("m-1", first, vec![mh("mh-a", MhRole::Primary)])
            .await
            .unwrap();

        fencing.failing.store(true, Ordering::SeqCst);
        let second = state.advance_generation("m-1").unwrap();
        let err = host
            .create("m-1", second, vec![mh("mh-b", MhRole::Primary)])
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Store(_)));

        let hosted = host.get("m-1").await.unwrap().unwrap();
        assert_eq!(hosted.generation, first);
        assert_eq!(hosted.mh_assignments[0].mh_id, "mh-a");
    }

    #[tokio::test]
    async fn snapshot_reports_resource_usage() {
        let state = StateStore::open_in_memory().unwrap();
        let mc = controller(&state, 10, 1000);
        assert!(mc.assign_meeting(offer("m-1", 1)).await.accepted);

        let snapshot = mc.snapshot().await;
        assert_eq!(snapshot.current_load, 1);
        let usage = snapshot.resource_usage.unwrap();
        assert!((0.0..=100.0).contains(&usage.cpu_percent));
        assert!((0.0..=100.0).contains(&usage.memory_percent));
    }

    #[tokio::test]
    async fn unhealthy_controller_rejects_unhealthy() {
        let state = StateStore::open_in_memory().unwrap();
        let mc = controller(&state, 10, 1000);
        mc.set_health(HealthStatus::Unhealthy);
        let resp = mc.assign_meeting(offer("m-1", 1)).await;
        assert_eq!(resp.rejection(), Some(RejectionReason::Unhealthy));
    }

    #[tokio::test]
    async fn stale_generation_is_rejected_unspecified() {
        let state = StateStore::open_in_memory().unwrap();
        let mc = controller(&state, 10, 1000);
        state.advance_generation("m-1").unwrap();
        state.advance_generation("m-1").unwrap();

        let resp = mc.assign_meeting(offer("m-1", 1)).await;
        assert_eq!(resp.rejection(), Some(RejectionReason::Unspecified));
        assert!(mc.host().get("m-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn re_offer_with_newer_generation_takes_over() {
        let state = StateStore::open_in_memory().unwrap();
        let mc = controller(&state, 1, 1000);
        let first = state.advance_generation("m-1").unwrap();
        assert!(mc.assign_meeting(offer("m-1", first)).await.accepted);

        // At capacity, but the meeting is already ours.
        let second = state.advance_generation("m-1").unwrap();
        assert!(mc.assign_meeting(offer("m-1", second)).await.accepted);
        assert_eq!(mc.host().get("m-1").await.unwrap().unwrap().generation, second);
    }

    struct ReplacementCoordinator;

    #[async_trait]
    impl CoordinatorClient for ReplacementCoordinator {
        async fn register(&self, _: RegisterWorkerRequest) -> RpcResult<RegisterWorkerResponse> {
            unimplemented!()
        }

        async fn heartbeat(&self, _: HeartbeatRequest) -> RpcResult<HeartbeatResponse> {
            unimplemented!()
        }

        async fn request_replacement(
            &self,
            req: ReplacementRequest,
        ) -> RpcResult<ReplacementResponse> {
            assert_eq!(req.requesting_mc_id, "mc-1");
            Ok(ReplacementResponse {
                replacement: mh("mh-c", MhRole::Primary),
            })
        }
    }

    #[tokio::test]
    async fn replace_media_handler_keeps_role_and_fences() {
        let state = StateStore::open_in_memory().unwrap();
        let mc = controller(&state, 10, 1000).with_coordinator(Arc::new(ReplacementCoordinator));
        let generation = state.advance_generation("m-1").unwrap();
        assert!(mc.assign_meeting(offer("m-1", generation)).await.accepted);

        let replacement = mc.replace_media_handler("m-1", "mh-b").await.unwrap();
        assert_eq!(replacement.mh_id, "mh-c");

        let hosted = mc.host().get("m-1").await.unwrap().unwrap();
        let backup = hosted
            .mh_assignments
            .iter()
            .find(|m| m.role == MhRole::Backup)
            .unwrap();
        assert_eq!(backup.mh_id, "mh-c");

        // A newer claim fences the controller out of further changes.
        state.advance_generation("m-1").unwrap();
        let err = mc.replace_media_handler("m-1", "mh-a").await.unwrap_err();
        assert!(matches!(err, ControllerError::FencedOut(_)));
        assert!(mc.host().get("m-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn router_requires_authorization() {
        let state = StateStore::open_in_memory().unwrap();
        let mc = Arc::new(controller(&state, 10, 1000));
        let issuer = HmacAuthorizer::new(MasterSecret::new(b"secret".to_vec()));
        let token = issuer.issue("gc-1", Scope::MeetingAssign);
        let router = controller_router(ControllerState {
            controller: mc,
            authorizer: Arc::new(issuer),
        });
        let body = serde_json::to_vec(&offer("m-1", 1)).unwrap();

        let unauthorized = router
            .clone()
            .oneshot(
                http::Request::post(ASSIGN_MEETING_PATH)
                    .header("content-type", "application/json")
                    .body(Body::from(body.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

        let resp = router
            .oneshot(
                http::Request::post(ASSIGN_MEETING_PATH)
                    .header("content-type", "application/json")
                    .header("x-meetgrid-service", "gc-1")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let decoded: AssignMeetingResponse = serde_json::from_slice(&bytes).unwrap();
        assert!(decoded.accepted);
    }

    #[tokio::test]
    async fn healthz_reflects_health() {
        let state = StateStore::open_in_memory().unwrap();
        let mc = Arc::new(controller(&state, 10, 1000));
        let router = controller_router(ControllerState {
            controller: mc.clone(),
            authorizer: Arc::new(AllowAll),
        });

        let ok = router
            .clone()
            .oneshot(http::Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        mc.set_health(HealthStatus::Unhealthy);
        let down = router
            .oneshot(http::Request::get("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
