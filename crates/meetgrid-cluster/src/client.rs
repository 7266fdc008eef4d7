//! RPC clients.
//!
//! The traits are the seams the coordinator and the worker agent are
//! written against; the `Http*` types are the production transports.
//! Tests substitute hand-written mocks.

use std::time::Duration;

use async_trait::async_trait;

use crate::auth::{ClientCredentials, Scope};
use crate::error::RpcResult;
use crate::transport::post_json;
use crate::proto::*;

/// Calls a worker makes to the coordinator.
#[async_trait]
pub trait CoordinatorClient: Send + Sync {
    async fn register(&self, req: RegisterWorkerRequest) -> RpcResult<RegisterWorkerResponse>;

    async fn heartbeat(&self, req: HeartbeatRequest) -> RpcResult<HeartbeatResponse>;

    async fn request_replacement(&self, req: ReplacementRequest)
    -> RpcResult<ReplacementResponse>;
}

/// Calls the coordinator makes to a meeting controller.
#[async_trait]
pub trait ControllerClient: Send + Sync {
    /// Offer a meeting to the controller listening on `endpoint`.
    async fn assign_meeting(
        &self,
        endpoint: &str,
        req: AssignMeetingRequest,
    ) -> RpcResult<AssignMeetingResponse>;

    /// Ask the controller on `endpoint` to drop a meeting it hosts.
    async fn release_meeting(
        &self,
        endpoint: &str,
        req: ReleaseMeetingRequest,
    ) -> RpcResult<ReleaseMeetingResponse>;
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// HTTP client for the coordinator's RPC routes.
#[derive(Clone, Debug)]
pub struct HttpCoordinatorClient {
    addr: String,
    credentials: ClientCredentials,
    timeout: Duration,
}

impl HttpCoordinatorClient {
    pub fn new(addr: impl Into<String>, credentials: ClientCredentials) -> Self {
        Self {
            addr: addr.into(),
            credentials,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CoordinatorClient for HttpCoordinatorClient {
    async fn register(&self, req: RegisterWorkerRequest) -> RpcResult<RegisterWorkerResponse> {
        let headers = self.credentials.headers(Scope::WorkerRegistry);
        post_json(&self.addr, REGISTER_WORKER_PATH, &headers, &req, self.timeout).await
    }

    async fn heartbeat(&self, req: HeartbeatRequest) -> RpcResult<HeartbeatResponse> {
        let headers = self.credentials.headers(Scope::WorkerRegistry);
        post_json(&self.addr, HEARTBEAT_PATH, &headers, &req, self.timeout).await
    }

    async fn request_replacement(
        &self,
        req: ReplacementRequest,
    ) -> RpcResult<ReplacementResponse> {
        let headers = self.credentials.headers(Scope::MeetingReplace);
        post_json(&self.addr, REQUEST_REPLACEMENT_PATH, &headers, &req, self.timeout).await
    }
}

/// HTTP client for controllers' assign and release routes.
#[derive(Clone, Debug)]
pub struct HttpControllerClient {
    credentials: ClientCredentials,
    timeout: Duration,
}

impl HttpControllerClient {
    pub fn new(credentials: ClientCredentials) -> Self {
        Self {
            credentials,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl ControllerClient for HttpControllerClient {
    async fn assign_meeting(
        &self,
        endpoint: &str,
        req: AssignMeetingRequest,
    ) -> RpcResult<AssignMeetingResponse> {
        let headers = self.credentials.headers(Scope::MeetingAssign);
        post_json(endpoint, ASSIGN_MEETING_PATH, &headers, &req, self.timeout).await
    }

    async fn release_meeting(
        &self,
        endpoint: &str,
        req: ReleaseMeetingRequest,
    ) -> RpcResult<ReleaseMeetingResponse> {
        let headers = self.credentials.headers(Scope::MeetingAssign);
        post_json(endpoint, RELEASE_MEETING_PATH, &headers, &req, self.timeout).await
    }
}

#[async_trait]
impl<T: CoordinatorClient + ?Sized> CoordinatorClient for std::sync::Arc<T> {
    async fn register(&self, req: RegisterWorkerRequest) -> RpcResult<RegisterWorkerResponse> {
        (**self).register(req).await
    }

    async fn heartbeat(&self, req: HeartbeatRequest) -> RpcResult<HeartbeatResponse> {
        (**self).heartbeat(req).await
    }

    async fn request_replacement(
        &self,
        req: ReplacementRequest,
    ) -> RpcResult<ReplacementResponse> {
        (**self).request_replacement(req).await
    }
}

#[async_trait]
impl<T: ControllerClient + ?Sized> ControllerClient for std::sync::Arc<T> {
    async fn assign_meeting(
        &self,
        endpoint: &str,
        req: AssignMeetingRequest,
    ) -> RpcResult<AssignMeetingResponse> {
        (**self).assign_meeting(endpoint, req).await
    }

    async fn release_meeting(
        &self,
        endpoint: &str,
        req: ReleaseMeetingRequest,
    ) -> RpcResult<ReleaseMeetingResponse> {
        (**self).release_meeting(endpoint, req).await
    }
}
