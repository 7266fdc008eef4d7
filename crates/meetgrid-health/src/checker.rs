//! Health checker — background sweep that demotes silent workers.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use meetgrid_state::{StateResult, StateStore, WorkerId};

pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_STALENESS_THRESHOLD: Duration = Duration::from_secs(30);

/// Callback invoked with the ids a sweep just marked unhealthy.
///
/// The coordinator uses this to move meetings off dead controllers.
pub type HealthCallback = Arc<dyn Fn(Vec<WorkerId>) -> BoxFuture + Send + Sync>;

pub type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Periodically marks workers with stale heartbeats as `Unhealthy`.
#[derive(Clone)]
pub struct HealthChecker {
    state: StateStore,
    /// Time between sweeps.
    interval: Duration,
    /// Heartbeat age after which a worker is unhealthy.
    staleness_threshold: Duration,
    on_unhealthy: Option<HealthCallback>,
}

impl HealthChecker {
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            interval: DEFAULT_CHECK_INTERVAL,
            staleness_threshold: DEFAULT_STALENESS_THRESHOLD,
            on_unhealthy: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_staleness_threshold(mut self, threshold: Duration) -> Self {
        self.staleness_threshold = threshold;
        self
    }

    /// Set a callback for workers a sweep transitions to `Unhealthy`.
    pub fn with_callback(mut self, callback: HealthCallback) -> Self {
        self.on_unhealthy = Some(callback);
        self
    }

    /// Run one sweep. Returns the ids it transitioned.
    pub async fn tick(&self) -> StateResult<Vec<WorkerId>> {
        let transitioned = self.state.mark_stale_unhealthy(self.staleness_threshold)?;
        if !transitioned.is_empty() {
            if let Some(ref cb) = self.on_unhealthy {
                cb(transitioned.clone()).await;
            }
        }
        Ok(transitioned)
    }

    /// Sweep every `interval` until `cancel` fires. A sweep in progress
    /// finishes first; a failed sweep is logged and the loop goes on.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            threshold_secs = self.staleness_threshold.as_secs(),
            "health checker started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("health checker shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.tick().await {
                        error!(error = %e, "health sweep failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meetgrid_state::{HealthStatus, WorkerKind, WorkerRecord, epoch_secs};
    use std::sync::Mutex;

    fn add_worker(state: &StateStore, id: &str, last_heartbeat_at: u64) {
        state
            .register_worker(WorkerRecord {
                id: id.to_string(),
                kind: WorkerKind::MeetingController,
                region: "us-east".to_string(),
                zone: "us-east-1a".to_string(),
                endpoint: format!("{id}:7000"),
                media_endpoint: None,
                max_capacity: 10,
                current_load: 0,
                health_status: HealthStatus::Pending,
                resource_usage: None,
                last_heartbeat_at,
                registered_at: last_heartbeat_at,
            })
            .unwrap();
        state.set_health(id, HealthStatus::Healthy).unwrap();
    }

    fn health(state: &StateStore, id: &str) -> HealthStatus {
        state.get_worker(id).unwrap().unwrap().health_status
    }

    #[tokio::test]
    async fn tick_marks_only_stale_workers() {
        let state = StateStore::open_in_memory().unwrap();
        add_worker(&state, "stale", 0);
        add_worker(&state, "fresh", epoch_secs());
        add_worker(&state, "leaving", 0);
        state.set_health("leaving", HealthStatus::Draining).unwrap();

        let checker = HealthChecker::new(state.clone());
        let transitioned = checker.tick().await.unwrap();

        assert_eq!(transitioned, vec!["stale".to_string()]);
        assert_eq!(health(&state, "stale"), HealthStatus::Unhealthy);
        assert_eq!(health(&state, "fresh"), HealthStatus::Healthy);
        assert_eq!(health(&state, "leaving"), HealthStatus::Draining);

        // A second sweep has nothing left to do.
        assert!(checker.tick().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn callback_receives_transitioned_ids() {
        let state = StateStore::open_in_memory().unwrap();
        add_worker(&state, "mc-1", 0);

        let seen: Arc<Mutex<Vec<WorkerId>>> = Arc::default();
        let sink = seen.clone();
        let callback: HealthCallback = Arc::new(move |ids: Vec<WorkerId>| -> BoxFuture {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().unwrap().extend(ids);
            })
        });
        let checker = HealthChecker::new(state).with_callback(callback);

        checker.tick().await.unwrap();
        checker.tick().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["mc-1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn run_sweeps_until_cancelled() {
        let state = StateStore::open_in_memory().unwrap();
        let checker = HealthChecker::new(state.clone()).with_interval(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(checker.run(cancel.child_token()));

        // Goes stale after the loop started; the next sweep catches it.
        add_worker(&state, "mc-1", 0);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(health(&state, "mc-1"), HealthStatus::Unhealthy);

        cancel.cancel();
        cancel.cancel();
        handle.await.unwrap();
    }
}
