//! Operator REST handlers.
//!
//! Each handler returns the `{success, data, error}` JSON envelope.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::warn;

use meetgrid_assignment::AssignmentError;
use meetgrid_cluster::auth::{Scope, authorize_headers};
use meetgrid_cluster::proto::MhAssignment;
use meetgrid_state::*;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

fn unauthorized() -> Response {
    error_response("unauthorized", StatusCode::UNAUTHORIZED)
}

/// Status code for a coordinator error.
pub(crate) fn assignment_status(e: &AssignmentError) -> StatusCode {
    match e {
        AssignmentError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        AssignmentError::NotAssigned(_) => StatusCode::NOT_FOUND,
        AssignmentError::NotOwner { .. } => StatusCode::FORBIDDEN,
        AssignmentError::NotBound { .. } => StatusCode::CONFLICT,
        AssignmentError::State(_) | AssignmentError::Fencing(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

// ── Workers ────────────────────────────────────────────────────

/// GET /api/v1/workers
pub async fn list_workers(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    if authorize_headers(&headers, state.authorizer.as_ref(), Scope::Operator).is_none() {
        return unauthorized();
    }
    match state.membership.state().list_workers() {
        Ok(workers) => ApiResponse::ok(workers).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

// ── Meetings ───────────────────────────────────────────────────

/// GET /api/v1/meetings
pub async fn list_meetings(State(state): State<ApiState>, headers: HeaderMap) -> Response {
    if authorize_headers(&headers, state.authorizer.as_ref(), Scope::Operator).is_none() {
        return unauthorized();
    }
    match state.coordinator.state().list_assignments() {
        Ok(rows) => ApiResponse::ok(rows).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Assign request body.
#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub region: String,
}

/// An assignment with the media endpoints clients connect to.
#[derive(Debug, Serialize)]
pub struct AssignmentView {
    pub assignment: MeetingAssignment,
    pub mh_assignments: Vec<MhAssignment>,
}

/// POST /api/v1/meetings/{id}/assign
pub async fn assign_meeting(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<AssignRequest>,
) -> Response {
    if authorize_headers(&headers, state.authorizer.as_ref(), Scope::Operator).is_none() {
        return unauthorized();
    }
    let assignment = match state.coordinator.assign_meeting(&id, &req.region).await {
        Ok(assignment) => assignment,
        Err(e) => {
            warn!(meeting_id = %id, error = %e, "assignment failed");
            // Only the generic message leaves the control plane.
            let msg = match e {
                AssignmentError::ServiceUnavailable => e.to_string(),
                _ => "internal error".to_string(),
            };
            return error_response(&msg, assignment_status(&e));
        }
    };
    match state.coordinator.media_handlers_of(&assignment) {
        Ok(mh_assignments) => ApiResponse::ok(AssignmentView {
            assignment,
            mh_assignments,
        })
        .into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// DELETE /api/v1/meetings/{id}
pub async fn release_meeting(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Response {
    if authorize_headers(&headers, state.authorizer.as_ref(), Scope::Operator).is_none() {
        return unauthorized();
    }
    match state.coordinator.release_meeting(&id).await {
        Ok(true) => ApiResponse::ok("released").into_response(),
        Ok(false) => error_response("meeting not assigned", StatusCode::NOT_FOUND),
        Err(e) => error_response(&e.to_string(), assignment_status(&e)),
    }
}

// ── Health ─────────────────────────────────────────────────────

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
