//! meetgrid-api — the coordinator's HTTP surface.
//!
//! Serves the worker-facing RPC routes and a small operator REST API.
//! RPC routes speak the raw wire messages of `meetgrid_cluster::proto`;
//! operator routes wrap results in the `{success, data, error}` envelope.
//!
//! # Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/rpc/v1/workers/register` | Worker registration |
//! | POST | `/rpc/v1/workers/heartbeat` | Fast and comprehensive heartbeats |
//! | POST | `/rpc/v1/meetings/replacement` | MH replacement requested by an MC |
//! | GET | `/api/v1/workers` | List registered workers |
//! | GET | `/api/v1/meetings` | List live assignments |
//! | POST | `/api/v1/meetings/{id}/assign` | Assign (or look up) a meeting |
//! | DELETE | `/api/v1/meetings/{id}` | Release a meeting's assignment |
//! | GET | `/healthz` | Liveness |

pub mod handlers;
pub mod rpc;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use meetgrid_assignment::Coordinator;
use meetgrid_cluster::auth::Authorizer;
use meetgrid_cluster::membership::MembershipManager;
use meetgrid_cluster::proto::{HEARTBEAT_PATH, REGISTER_WORKER_PATH, REQUEST_REPLACEMENT_PATH};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub membership: MembershipManager,
    pub coordinator: Arc<Coordinator>,
    pub authorizer: Arc<dyn Authorizer>,
}

/// Build the complete coordinator router (RPC + operator REST).
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/workers", get(handlers::list_workers))
        .route("/meetings", get(handlers::list_meetings))
        .route("/meetings/{id}", delete(handlers::release_meeting))
        .route("/meetings/{id}/assign", post(handlers::assign_meeting))
        .with_state(state.clone());

    Router::new()
        .route(REGISTER_WORKER_PATH, post(rpc::register_worker))
        .route(HEARTBEAT_PATH, post(rpc::heartbeat))
        .route(REQUEST_REPLACEMENT_PATH, post(rpc::request_replacement))
        .route("/healthz", get(handlers::healthz))
        .with_state(state)
        .nest("/api/v1", api_routes)
}
