//! Coordinator mode — registry, health checker, assignment, API server.
//!
//! In this mode, the daemon:
//! 1. Opens the worker registry (redb) and the fencing store
//! 2. Builds the candidate selector and the assignment coordinator
//! 3. Runs the health checker, failing over meetings of dead controllers
//! 4. Serves worker RPCs and the operator API on one HTTP listener

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use meetgrid_api::{ApiState, build_router};
use meetgrid_assignment::Coordinator;
use meetgrid_cluster::{
    ClientCredentials, HmacAuthorizer, HttpControllerClient, MasterSecret, MembershipManager,
    authorizer_for,
};
use meetgrid_fencing::{FencingStore, RedisFencingStore};
use meetgrid_health::{BoxFuture, HealthCallback, HealthChecker};
use meetgrid_placement::{CandidateSelector, SelectionConfig, SelectionWeights};
use meetgrid_state::{StateStore, WorkerId};

use crate::config::CoordinatorSettings;

/// Redis key prefix for fencing state.
pub const FENCING_PREFIX: &str = "meetgrid:fence";

/// Assemble every coordinator subsystem on an opened store.
async fn build_coordinator(
    settings: &CoordinatorSettings,
    state: StateStore,
    issuer: Option<Arc<HmacAuthorizer>>,
) -> anyhow::Result<(ApiState, HealthChecker)> {
    let fencing: Arc<dyn FencingStore> = match &settings.redis_url {
        Some(url) => Arc::new(RedisFencingStore::connect(url, FENCING_PREFIX).await?),
        None => {
            info!("using the embedded fencing store");
            Arc::new(state.clone())
        }
    };

    let mut weights = SelectionWeights::default();
    if let Some(boost) = settings.locality_boost {
        weights.locality_boost = boost;
    }
    let selector = CandidateSelector::new(
        state.clone(),
        SelectionConfig {
            local_zone: Some(settings.zone.clone()),
            weights,
            region_fallback: settings.region_fallback,
        },
    );

    let controllers = HttpControllerClient::new(ClientCredentials::new(
        settings.id.clone(),
        issuer.clone(),
    ))
    .with_timeout(settings.rpc_timeout);
    let coordinator = Arc::new(
        Coordinator::new(
            settings.id.clone(),
            state.clone(),
            selector,
            fencing,
            Arc::new(controllers),
        )
        .with_max_attempts(settings.max_attempts),
    );

    let mut membership = MembershipManager::new(state.clone());
    if let Some((fast, comprehensive)) = settings.heartbeat_overrides {
        membership = membership.with_heartbeat_intervals(fast, comprehensive);
    }

    let failover = coordinator.clone();
    let on_unhealthy: HealthCallback = Arc::new(move |ids: Vec<WorkerId>| -> BoxFuture {
        let coordinator = failover.clone();
        Box::pin(async move { coordinator.handle_unhealthy_workers(&ids).await })
    });
    let checker = HealthChecker::new(state)
        .with_interval(settings.check_interval)
        .with_staleness_threshold(settings.staleness_threshold)
        .with_callback(on_unhealthy);

    let api = ApiState {
        membership,
        coordinator,
        authorizer: authorizer_for(issuer),
    };
    Ok((api, checker))
}

/// Run the coordinator until Ctrl-C.
pub async fn run_coordinator(
    settings: CoordinatorSettings,
    secret: Option<MasterSecret>,
) -> anyhow::Result<()> {
    info!(
        coordinator_id = %settings.id,
        region = %settings.region,
        zone = %settings.zone,
        "meetgrid daemon starting in coordinator mode"
    );

    std::fs::create_dir_all(&settings.data_dir)?;
    let db_path = settings.data_dir.join("meetgrid.redb");
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let issuer = secret.map(|s| Arc::new(HmacAuthorizer::new(s)));
    let (api, checker) = build_coordinator(&settings, state, issuer).await?;

    // ── Shutdown hierarchy ─────────────────────────────────────
    let root = CancellationToken::new();
    crate::cancel_on_ctrl_c(root.clone());

    let checker_handle = tokio::spawn(checker.run(root.child_token()));

    let listener = tokio::net::TcpListener::bind(settings.listen).await?;
    info!(addr = %settings.listen, "API server starting");
    axum::serve(listener, build_router(api))
        .with_graceful_shutdown(root.child_token().cancelled_owned())
        .await?;

    root.cancel();
    let _ = checker_handle.await;

    info!("meetgrid coordinator stopped");
    Ok(())
}
