//! meetgrid-cluster — the RPC surface between coordinators and workers.
//!
//! Workers (meeting controllers and media handlers) register with a
//! coordinator and keep themselves alive with two heartbeat streams. The
//! coordinator offers meetings to controllers (and releases them again), and
//! controllers ask the coordinator for replacement media handlers.
//!
//! # Architecture
//!
//! ```text
//! worker process                              coordinator process
//! ┌─────────────────────────┐                 ┌──────────────────────────┐
//! │ WorkerAgent             │── Register ────▶│ MembershipManager        │
//! │   fast / comprehensive  │── Heartbeat ───▶│   └── StateStore         │
//! │   heartbeat loops       │                 │                          │
//! │                         │                 │ (meetgrid-assignment)    │
//! │ MeetingController       │◀── AssignMeeting│   Coordinator            │
//! │                         │◀── Release ─────│                          │
//! │   └── meeting host task │── Replacement ─▶│                          │
//! └─────────────────────────┘                 └──────────────────────────┘
//! ```
//!
//! Messages are JSON over HTTP/1.1 ([`proto`]); every call is authorized
//! with a per-scope HMAC token ([`auth`]).

pub mod agent;
pub mod auth;
pub mod client;
pub mod controller;
pub mod error;
pub mod membership;
pub mod proto;
mod transport;
pub mod usage;

pub use agent::{AgentConfig, AgentState, BackoffConfig, LoadReporter, LoadSnapshot, WorkerAgent};
pub use auth::{
    Authorizer, ClientCredentials, HmacAuthorizer, MasterSecret, Scope, authorizer_for,
};
pub use client::{ControllerClient, CoordinatorClient, HttpControllerClient, HttpCoordinatorClient};
pub use controller::{
    ControllerCapacity, ControllerError, ControllerState, MeetingController, MeetingHostHandle,
    controller_router,
};
pub use error::{AgentError, RpcError, RpcResult};
pub use membership::MembershipManager;
pub use usage::SystemUsage;
