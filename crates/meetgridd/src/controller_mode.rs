//! Controller mode — a meeting controller worker.
//!
//! In this mode, the daemon:
//! 1. Opens the fencing store (shared Redis, or a local redb file)
//! 2. Starts the meeting-host task and the assign RPC server
//! 3. Registers with the coordinator and heartbeats until shutdown
//! 4. On Ctrl-C, reports `Draining` once before stopping

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use meetgrid_cluster::agent::HeartbeatKind;
use meetgrid_cluster::controller::ControllerState;
use meetgrid_cluster::{
    AgentConfig, ClientCredentials, ControllerCapacity, HmacAuthorizer, HttpCoordinatorClient,
    MasterSecret, MeetingController, MeetingHostHandle, WorkerAgent, authorizer_for,
    controller_router,
};
use meetgrid_fencing::{FencingStore, RedisFencingStore};
use meetgrid_state::{StateStore, WorkerKind};

use crate::config::ControllerSettings;
use crate::coordinator_mode::FENCING_PREFIX;

/// Run the controller until Ctrl-C.
pub async fn run_controller(
    settings: ControllerSettings,
    secret: Option<MasterSecret>,
) -> anyhow::Result<()> {
    info!(
        mc_id = %settings.id,
        region = %settings.region,
        zone = %settings.zone,
        coordinator = %settings.coordinator,
        "meetgrid daemon starting in controller mode"
    );

    let fencing: Arc<dyn FencingStore> = match &settings.redis_url {
        Some(url) => Arc::new(RedisFencingStore::connect(url, FENCING_PREFIX).await?),
        None => {
            std::fs::create_dir_all(&settings.data_dir)?;
            let db_path = settings.data_dir.join("meetgrid-controller.redb");
            warn!(path = ?db_path, "no redis configured, fencing against a local store only");
            Arc::new(StateStore::open(&db_path)?)
        }
    };

    let issuer = secret.map(|s| Arc::new(HmacAuthorizer::new(s)));
    let root = CancellationToken::new();

    // ── Meeting host + assign service ──────────────────────────
    let host = MeetingHostHandle::spawn(fencing, settings.id.clone(), root.child_token());
    let coordinator_client = Arc::new(
        HttpCoordinatorClient::new(
            settings.coordinator.clone(),
            ClientCredentials::new(settings.id.clone(), issuer.clone()),
        )
        .with_timeout(settings.rpc_timeout),
    );
    let controller = Arc::new(
        MeetingController::new(
            settings.id.clone(),
            ControllerCapacity {
                max_meetings: settings.max_meetings,
                max_participants: settings.max_participants,
            },
            host,
        )
        .with_coordinator(coordinator_client.clone()),
    );

    // ── Registration + heartbeats ──────────────────────────────
    let mut agent_config = AgentConfig::new(
        settings.id.clone(),
        WorkerKind::MeetingController,
        settings.region.clone(),
        settings.zone.clone(),
        settings.advertise.clone(),
        settings.max_meetings,
    );
    agent_config.fast_heartbeat_interval = settings.fast_heartbeat_interval;
    agent_config.comprehensive_heartbeat_interval = settings.comprehensive_heartbeat_interval;
    agent_config.backoff = settings.backoff.clone();
    let agent = Arc::new(WorkerAgent::new(
        agent_config,
        coordinator_client,
        controller.clone(),
    ));
    let agent_handle = tokio::spawn(agent.clone().run(root.child_token()));

    // ── Drain on Ctrl-C, then stop ─────────────────────────────
    let drain_controller = controller.clone();
    let drain_agent = agent.clone();
    let shutdown = root.clone();
    tokio::spawn(async move {
        crate::ctrl_c().await;
        drain_controller.set_draining(true);
        drain_agent.set_draining(true);
        if drain_agent.is_registered() {
            if let Err(e) = drain_agent.heartbeat_once(HeartbeatKind::Fast).await {
                warn!(error = %e, "failed to report draining");
            }
        }
        shutdown.cancel();
    });

    // ── Assign RPC server ──────────────────────────────────────
    let router = controller_router(ControllerState {
        controller,
        authorizer: authorizer_for(issuer),
    });
    let listener = tokio::net::TcpListener::bind(settings.listen).await?;
    info!(addr = %settings.listen, advertise = %settings.advertise, "assign server starting");
    axum::serve(listener, router)
        .with_graceful_shutdown(root.child_token().cancelled_owned())
        .await?;

    root.cancel();
    let _ = agent_handle.await;

    info!("meetgrid controller stopped");
    Ok(())
}
