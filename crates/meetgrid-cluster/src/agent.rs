//! Worker agent — registration and heartbeats toward the coordinator.
//!
//! The agent runs inside every MC and MH. It registers with exponential
//! backoff, then sends two independent heartbeat streams: a fast one
//! (load + health) and a comprehensive one (adds CPU/memory). Losing the
//! coordinator never stops the process; the agent keeps retrying
//! registration on heartbeat ticks until the coordinator answers.
//!
//! ```text
//! Unregistered ─▶ Registering ─▶ Registered ◀─┐
//!                      │              │       │
//!                      └─▶ ReRegistering ◀────┘ (exhausted / NotFound)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use meetgrid_state::{HealthStatus, ResourceUsage, WorkerKind};
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::CoordinatorClient;
use crate::error::AgentError;
use crate::proto::*;

/// Registration state of the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Unregistered,
    Registering,
    Registered,
    /// Lost or never completed registration; retried on heartbeat ticks.
    ReRegistering,
}

/// Exponential backoff for the initial registration.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
    pub max_attempts: u32,
    /// Total time budget for the initial registration.
    pub deadline: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            max_attempts: 20,
            deadline: Duration::from_secs(300),
        }
    }
}

impl BackoffConfig {
    /// Delay after the `attempt`-th failure (0-based): `base * 2^attempt`, capped.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Configuration for the worker agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub worker_id: String,
    pub kind: WorkerKind,
    pub region: String,
    pub zone: String,
    /// Our RPC endpoint, advertised to the coordinator.
    pub endpoint: String,
    pub media_endpoint: Option<String>,
    pub max_capacity: u32,
    pub fast_heartbeat_interval: Duration,
    pub comprehensive_heartbeat_interval: Duration,
    pub backoff: BackoffConfig,
}

impl AgentConfig {
    pub fn new(
        worker_id: impl Into<String>,
        kind: WorkerKind,
        region: impl Into<String>,
        zone: impl Into<String>,
        endpoint: impl Into<String>,
        max_capacity: u32,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            kind,
            region: region.into(),
            zone: zone.into(),
            endpoint: endpoint.into(),
            media_endpoint: None,
            max_capacity,
            fast_heartbeat_interval: Duration::from_secs(10),
            comprehensive_heartbeat_interval: Duration::from_secs(30),
            backoff: BackoffConfig::default(),
        }
    }
}

/// Which heartbeat stream a tick belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatKind {
    /// Load and health.
    Fast,
    /// Load, health and resource usage.
    Comprehensive,
}

/// What a worker reports in its heartbeats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSnapshot {
    pub current_load: u32,
    pub health: HealthStatus,
    pub resource_usage: Option<ResourceUsage>,
}

/// Source of load/health for heartbeats.
#[async_trait]
pub trait LoadReporter: Send + Sync {
    async fn snapshot(&self) -> LoadSnapshot;
}

#[derive(Debug, Clone, Copy)]
struct HeartbeatIntervals {
    fast: Duration,
    comprehensive: Duration,
}

/// Keeps one worker registered with the coordinator.
pub struct WorkerAgent<C> {
    config: AgentConfig,
    client: C,
    reporter: Arc<dyn LoadReporter>,
    state: watch::Sender<AgentState>,
    intervals: RwLock<HeartbeatIntervals>,
    /// Held for the duration of every registration/heartbeat RPC so calls
    /// from this worker never overlap.
    in_flight: Mutex<()>,
    draining: AtomicBool,
}

impl<C: CoordinatorClient + 'static> WorkerAgent<C> {
    pub fn new(config: AgentConfig, client: C, reporter: Arc<dyn LoadReporter>) -> Self {
        let intervals = HeartbeatIntervals {
            fast: config.fast_heartbeat_interval,
            comprehensive: config.comprehensive_heartbeat_interval,
        };
        let (state, _) = watch::channel(AgentState::Unregistered);
        Self {
            config,
            client,
            reporter,
            state,
            intervals: RwLock::new(intervals),
            in_flight: Mutex::new(()),
            draining: AtomicBool::new(false),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.config.worker_id
    }

    pub fn state(&self) -> AgentState {
        *self.state.borrow()
    }

    pub fn is_registered(&self) -> bool {
        self.state() == AgentState::Registered
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<AgentState> {
        self.state.subscribe()
    }

    /// Report `Draining` in every following heartbeat (or stop doing so).
    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::SeqCst);
        info!(worker_id = %self.config.worker_id, draining, "drain flag changed");
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Current `(fast, comprehensive)` heartbeat intervals.
    pub async fn heartbeat_intervals(&self) -> (Duration, Duration) {
        let intervals = *self.intervals.read().await;
        (intervals.fast, intervals.comprehensive)
    }

    /// Register, then heartbeat until `cancel` fires.
    ///
    /// Never returns early on coordinator failures: an exhausted
    /// registration leaves the agent `ReRegistering` and the heartbeat
    /// loops keep retrying.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if let Err(e) = self.register_with_backoff(&cancel).await {
            warn!(worker_id = %self.config.worker_id, error = %e, "initial registration incomplete, retrying on heartbeat ticks");
        }
        if cancel.is_cancelled() {
            return;
        }

        let fast = tokio::spawn(
            self.clone()
                .heartbeat_loop(HeartbeatKind::Fast, cancel.child_token()),
        );
        let comprehensive = tokio::spawn(
            self.clone()
                .heartbeat_loop(HeartbeatKind::Comprehensive, cancel.child_token()),
        );
        let (fast, comprehensive) = tokio::join!(fast, comprehensive);
        self.report_loop_exit(HeartbeatKind::Fast, fast);
        self.report_loop_exit(HeartbeatKind::Comprehensive, comprehensive);
        info!(worker_id = %self.config.worker_id, "worker agent stopped");
    }

    /// Log how a heartbeat loop task ended; `false` if it panicked or was aborted.
    fn report_loop_exit(&self, kind: HeartbeatKind, result: Result<(), JoinError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                error!(
                    worker_id = %self.config.worker_id,
                    ?kind,
                    panicked = e.is_panic(),
                    error = %e,
                    "heartbeat loop terminated abnormally"
                );
                false
            }
        }
    }

    /// Register with exponential backoff, bounded by attempts and deadline.
    pub async fn register_with_backoff(&self, cancel: &CancellationToken) -> Result<(), AgentError> {
        self.state.send_replace(AgentState::Registering);
        let backoff = &self.config.backoff;
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let result = {
                let _permit = self.in_flight.lock().await;
                self.register_once().await
            };
            let err = match result {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            let delay = backoff.delay(attempt);
            attempt += 1;
            if attempt >= backoff.max_attempts || started.elapsed() + delay > backoff.deadline {
                warn!(
                    worker_id = %self.config.worker_id,
                    attempts = attempt,
                    error = %err,
                    "registration retries exhausted"
                );
                self.state.send_replace(AgentState::ReRegistering);
                return Err(AgentError::Exhausted { attempts: attempt });
            }

            debug!(worker_id = %self.config.worker_id, attempt, retry_in = ?delay, error = %err, "registration failed");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.state.send_replace(AgentState::ReRegistering);
                    return Err(err);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One heartbeat tick.
    ///
    /// When not registered, the tick is spent on a single registration
    /// attempt instead. A `NotFound` answer triggers one immediate
    /// re-registration attempt.
    pub async fn heartbeat_once(&self, kind: HeartbeatKind) -> Result<(), AgentError> {
        let _permit = self.in_flight.lock().await;

        if self.state() != AgentState::Registered {
            self.state.send_replace(AgentState::ReRegistering);
            return self.register_once().await;
        }

        let snapshot = self.reporter.snapshot().await;
        let health = if self.is_draining() {
            HealthStatus::Draining
        } else {
            snapshot.health
        };
        let req = HeartbeatRequest {
            worker_id: self.config.worker_id.clone(),
            current_load: snapshot.current_load,
            health: health.code(),
            resource_usage: match kind {
                HeartbeatKind::Fast => None,
                HeartbeatKind::Comprehensive => snapshot.resource_usage,
            },
        };

        let resp = self.client.heartbeat(req).await?;
        match resp.status {
            HeartbeatStatus::Ok => {
                debug!(worker_id = %self.config.worker_id, ?kind, "heartbeat acknowledged");
                Ok(())
            }
            HeartbeatStatus::NotFound => {
                warn!(worker_id = %self.config.worker_id, "coordinator does not know us, re-registering");
                self.state.send_replace(AgentState::ReRegistering);
                self.register_once().await
            }
        }
    }

    async fn heartbeat_loop(self: Arc<Self>, kind: HeartbeatKind, cancel: CancellationToken) {
        loop {
            let interval = {
                let intervals = self.intervals.read().await;
                match kind {
                    HeartbeatKind::Fast => intervals.fast,
                    HeartbeatKind::Comprehensive => intervals.comprehensive,
                }
            };
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(worker_id = %self.config.worker_id, ?kind, "heartbeat loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.heartbeat_once(kind).await {
                        warn!(worker_id = %self.config.worker_id, ?kind, error = %e, "heartbeat failed");
                    }
                }
            }
        }
    }

    /// A single registration RPC. Callers hold `in_flight`.
    async fn register_once(&self) -> Result<(), AgentError> {
        let req = RegisterWorkerRequest {
            worker_id: self.config.worker_id.clone(),
            kind: self.config.kind,
            region: self.config.region.clone(),
            zone: self.config.zone.clone(),
            endpoint: self.config.endpoint.clone(),
            media_endpoint: self.config.media_endpoint.clone(),
            max_capacity: self.config.max_capacity,
        };
        let resp = self.client.register(req).await?;
        if !resp.accepted {
            return Err(AgentError::Rejected);
        }

        {
            let mut intervals = self.intervals.write().await;
            if let Some(secs) = resp.fast_heartbeat_interval_secs.filter(|s| *s > 0) {
                intervals.fast = Duration::from_secs(secs);
            }
            if let Some(secs) = resp.comprehensive_heartbeat_interval_secs.filter(|s| *s > 0) {
                intervals.comprehensive = Duration::from_secs(secs);
            }
        }

        self.state.send_replace(AgentState::Registered);
        info!(
            worker_id = %self.config.worker_id,
            kind = %self.config.kind,
            region = %self.config.region,
            "registered with coordinator"
        );
        Ok(())
    }
}
