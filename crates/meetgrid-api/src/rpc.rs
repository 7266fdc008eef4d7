//! Worker-facing RPC handlers.
//!
//! Bodies are the raw `meetgrid_cluster::proto` messages. Failures are a
//! status code with a short text body, which the hyper client surfaces as
//! `RpcError::Status`.

use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use tracing::{error, warn};

use meetgrid_cluster::auth::{Scope, authorize_headers};
use meetgrid_cluster::proto::{HeartbeatRequest, RegisterWorkerRequest, ReplacementRequest};
use meetgrid_state::StateError;

use crate::ApiState;
use crate::handlers::assignment_status;

fn failure(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, msg.into()).into_response()
}

/// Authorize a worker-registry call; with authorization on, a worker may
/// only speak for itself.
fn authorize_worker(state: &ApiState, headers: &HeaderMap, worker_id: &str) -> Result<(), Response> {
    let Some(caller) =
        authorize_headers(headers, state.authorizer.as_ref(), Scope::WorkerRegistry)
    else {
        return Err(failure(StatusCode::UNAUTHORIZED, "unauthorized"));
    };
    if !caller.is_empty() && caller != worker_id {
        warn!(%caller, %worker_id, "worker id does not match caller");
        return Err(failure(StatusCode::FORBIDDEN, "caller does not match worker_id"));
    }
    Ok(())
}

/// POST /rpc/v1/workers/register
pub async fn register_worker(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<RegisterWorkerRequest>,
) -> Response {
    if let Err(resp) = authorize_worker(&state, &headers, &req.worker_id) {
        return resp;
    }
    let worker_id = req.worker_id.clone();
    match state.membership.register(req) {
        Ok(resp) => Json(resp).into_response(),
        Err(StateError::Conflict(msg)) => {
            warn!(%worker_id, %msg, "registration conflict");
            failure(StatusCode::CONFLICT, msg)
        }
        Err(e) => {
            error!(%worker_id, error = %e, "registration failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "registration failed")
        }
    }
}

/// POST /rpc/v1/workers/heartbeat
pub async fn heartbeat(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<HeartbeatRequest>,
) -> Response {
    if let Err(resp) = authorize_worker(&state, &headers, &req.worker_id) {
        return resp;
    }
    let worker_id = req.worker_id.clone();
    match state.membership.heartbeat(req) {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => {
            error!(%worker_id, error = %e, "heartbeat failed");
            failure(StatusCode::INTERNAL_SERVER_ERROR, "heartbeat failed")
        }
    }
}

/// POST /rpc/v1/meetings/replacement
///
/// With authorization on, the caller must be the MC named in the request.
pub async fn request_replacement(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(req): Json<ReplacementRequest>,
) -> Response {
    let Some(caller) =
        authorize_headers(&headers, state.authorizer.as_ref(), Scope::MeetingReplace)
    else {
        return failure(StatusCode::UNAUTHORIZED, "unauthorized");
    };
    if !caller.is_empty() && caller != req.requesting_mc_id {
        return failure(StatusCode::FORBIDDEN, "caller does not match requesting_mc_id");
    }

    let meeting_id = req.meeting_id.clone();
    match state.coordinator.request_replacement(req).await {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => {
            warn!(%meeting_id, error = %e, "replacement failed");
            failure(assignment_status(&e), e.to_string())
        }
    }
}
