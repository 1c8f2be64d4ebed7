use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arttic_core::model::ModelResolver;
use arttic_events::EventBus;
use arttic_pipeline::{PipelineManager, SimulatedBackend};
use arttic_worker::{ImageStore, JobExecutor, LocalImageStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use arttic_api::config::ServerConfig;
use arttic_api::notifications::NotificationRouter;
use arttic_api::router::build_app_router;
use arttic_api::state::AppState;
use arttic_api::ws;

const DEFAULT_LOG_FILTER: &str =
    "arttic_api=debug,arttic_worker=debug,arttic_pipeline=debug,tower_http=info";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Image store ---
    let store: Arc<dyn ImageStore> = Arc::new(
        LocalImageStore::new(&config.outputs_dir).expect("Failed to open outputs directory"),
    );
    tracing::info!(outputs_dir = %config.outputs_dir.display(), "Image store ready");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());

    // --- Job executor (owns the accelerator) ---
    let backend = SimulatedBackend::new(config.simulator_config());
    let manager = PipelineManager::new(backend, config.hf_token.clone());
    let (executor, worker_thread) =
        JobExecutor::spawn(manager, Arc::clone(&store), Arc::clone(&event_bus))
            .expect("Failed to start job executor");

    // --- WebSocket registry ---
    let registry = Arc::new(ws::ConnectionRegistry::new());
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&registry));

    // Spawn notification router (broadcasts pipeline state changes).
    let notification_router = NotificationRouter::new(Arc::clone(&registry));
    let router_handle = tokio::spawn(notification_router.run(event_bus.subscribe()));

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        registry: Arc::clone(&registry),
        executor: executor.clone(),
        store,
        resolver: ModelResolver::new(&config.models_dir),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let ws_count = registry.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    registry.shutdown_all().await;

    heartbeat_handle.abort();

    // Let the worker finish queued jobs and release the pipeline.
    executor.shutdown();
    let timeout = config.shutdown_timeout();
    let join = tokio::task::spawn_blocking(move || worker_thread.join());
    match tokio::time::timeout(timeout, join).await {
        Ok(Ok(Ok(()))) => tracing::info!("Job executor stopped"),
        Ok(Ok(Err(_))) => tracing::error!("Job executor thread panicked"),
        Ok(Err(e)) => tracing::error!(error = %e, "Failed to join job executor"),
        Err(_) => tracing::warn!(?timeout, "Job executor did not stop in time"),
    }

    drop(event_bus);
    if tokio::time::timeout(Duration::from_secs(5), router_handle)
        .await
        .is_err()
    {
        tracing::debug!("Notification router still subscribed, abandoning it");
    }

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
