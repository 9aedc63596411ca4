//! Pairing Controller
//!
//! Entry point for the Switchboard signaling service.
//!
//! # Startup order
//!
//! 1. Tracing, configuration
//! 2. Shared store connection (readiness flips true here)
//! 3. Analytics writer (optional, never fatal)
//! 4. WebSocket/HTTP server
//!
//! # Shutdown
//!
//! On SIGTERM/SIGINT the instance stops advertising readiness, cancels
//! every session (paired clients are told `partner-disconnected` and their
//! rooms are closed), drains for a bounded period, then exits.

use common::secret::ExposeSecret;
use pairing_controller::analytics::{self, AnalyticsRecorder};
use pairing_controller::config::Config;
use pairing_controller::gateway::{self, AppState};
use pairing_controller::matcher::Matcher;
use pairing_controller::observability::health::HealthState;
use pairing_controller::router::Router;
use pairing_controller::store::RedisStore;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // RUST_LOG wins; LOG_LEVEL is the operator-friendly fallback.
    let fallback_filter = std::env::var("LOG_LEVEL")
        .map(|level| format!("pairing_controller={level},tower_http=info"))
        .unwrap_or_else(|_| "pairing_controller=info,tower_http=info".to_string());
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&fallback_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Pairing Controller");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        port = config.port,
        cors_origin = %config.cors_origin,
        redis_host = %config.redis_host,
        redis_port = config.redis_port,
        analytics_enabled = config.analytics_enabled,
        drain_seconds = config.drain_seconds,
        "Configuration loaded successfully"
    );

    let health_state = Arc::new(HealthState::new());
    let cancel_token = CancellationToken::new();

    info!("Connecting to shared store...");
    let store = RedisStore::connect(&config.redis_url()).await?;
    info!("Shared store connection established");
    health_state.set_ready();

    let (analytics_recorder, analytics_task) =
        init_analytics(&config, cancel_token.clone()).await;

    let matcher = Matcher::new(Arc::new(store)).with_analytics(analytics_recorder);
    let router = Arc::new(Router::new());

    let state = Arc::new(AppState {
        matcher,
        router,
        ice_servers: config.ice_servers(),
        shutdown: cancel_token.clone(),
    });

    let app = gateway::build_routes(state, Arc::clone(&health_state), &config)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Pairing Controller listening on {}", addr);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal(
        cancel_token.clone(),
        Arc::clone(&health_state),
        config.drain_seconds,
    ));

    if let Err(e) = server.await {
        error!("Server error: {}", e);
    }

    // Belt for the error path: the signal handler normally did this.
    cancel_token.cancel();

    if let Some(task) = analytics_task {
        info!("Waiting for the analytics writer to flush...");
        if let Err(e) = task.await {
            error!("Analytics task error: {}", e);
        }
    }

    info!("Pairing Controller shutdown complete");

    Ok(())
}

/// Bring up the analytics store. Analytics is strictly best-effort: a
/// failed connection logs a warning and the service runs without audit.
async fn init_analytics(
    config: &Config,
    cancel_token: CancellationToken,
) -> (AnalyticsRecorder, Option<JoinHandle<()>>) {
    if !config.analytics_enabled {
        return (AnalyticsRecorder::disabled(), None);
    }
    let Some(database_url) = &config.database_url else {
        // Config::from_vars enforces this; defensive for direct construction.
        return (AnalyticsRecorder::disabled(), None);
    };

    info!("Connecting to analytics store...");
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url.expose_secret())
        .await;

    match pool {
        Ok(pool) => {
            if let Err(e) = analytics::ensure_schema(&pool).await {
                warn!("Analytics schema init failed, running without audit: {}", e);
                return (AnalyticsRecorder::disabled(), None);
            }
            info!("Analytics store connection established");
            let (recorder, task) = AnalyticsRecorder::spawn(pool, cancel_token);
            (recorder, Some(task))
        }
        Err(e) => {
            warn!(
                "Analytics store unavailable, running without audit: {}",
                e
            );
            (AnalyticsRecorder::disabled(), None)
        }
    }
}

/// Listens for shutdown signals (SIGTERM, SIGINT). Returns when a signal
/// was received and the drain period is complete. Also flips readiness and
/// triggers the cancellation token for coordinated shutdown.
async fn shutdown_signal(
    cancel_token: CancellationToken,
    health_state: Arc<HealthState>,
    drain_seconds: u64,
) {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    // Stop advertising readiness, then cancel every session: paired
    // clients get partner-disconnected, rooms are closed, queues cleaned.
    health_state.set_not_ready();
    cancel_token.cancel();

    if drain_seconds > 0 {
        warn!("Draining connections for {} seconds...", drain_seconds);
        tokio::time::sleep(Duration::from_secs(drain_seconds)).await;
        info!("Drain period complete");
    } else {
        info!("Skipping drain period (PC_DRAIN_SECONDS=0)");
    }
}
