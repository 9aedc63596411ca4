//! Transport gateway: HTTP surface and WebSocket acceptance.
//!
//! Builds the axum router that exposes:
//! - `GET /ws` - the signaling channel (WebSocket upgrade)
//! - `GET /stats` - matcher statistics
//! - `GET /health`, `GET /ready` - probes (see [`crate::observability`])

pub mod ws;

use crate::config::Config;
use crate::errors::PcError;
use crate::matcher::{Matcher, Stats};
use crate::observability::health::{health_router, HealthState};
use crate::protocol::IceServer;
use crate::router::Router;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::routing::get;
use axum::{Json, Router as AxumRouter};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// State shared by every connection and handler.
pub struct AppState {
    pub matcher: Matcher,
    pub router: Arc<Router>,
    /// ICE descriptors sent once per connection.
    pub ice_servers: Vec<IceServer>,
    /// Root token; each session gets a child, so cancelling this drains
    /// every connection.
    pub shutdown: CancellationToken,
}

/// Build the application routes.
pub fn build_routes(
    state: Arc<AppState>,
    health_state: Arc<HealthState>,
    config: &Config,
) -> Result<AxumRouter, PcError> {
    let cors = if config.cors_origin == "*" {
        CorsLayer::new().allow_origin(Any)
    } else {
        let origin = config
            .cors_origin
            .parse::<HeaderValue>()
            .map_err(|e| PcError::Config(format!("invalid CORS_ORIGIN: {e}")))?;
        CorsLayer::new().allow_origin(origin)
    };

    // Plain HTTP endpoints get a request timeout; the WebSocket route must
    // not, since the upgraded connection is long-lived.
    let http_routes = AxumRouter::new()
        .route("/stats", get(stats_handler))
        .with_state(Arc::clone(&state))
        .merge(health_router(health_state))
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    let ws_route = AxumRouter::new()
        .route("/ws", get(ws::websocket_handler))
        .with_state(state);

    Ok(http_routes
        .merge(ws_route)
        .layer(TraceLayer::new_for_http())
        .layer(cors))
}

/// Matcher statistics for dashboards. Reads go straight to the store.
async fn stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Stats>, StatusCode> {
    state.matcher.stats().await.map(Json).map_err(|e| {
        warn!(target: "pc.gateway", error = %e, "Stats read failed");
        StatusCode::SERVICE_UNAVAILABLE
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState {
            matcher: Matcher::new(Arc::new(MemoryStore::new())),
            router: Arc::new(Router::new()),
            ice_servers: Vec::new(),
            shutdown: CancellationToken::new(),
        })
    }

    #[test]
    fn test_build_routes_with_wildcard_cors() {
        let config = Config::from_vars(&std::collections::HashMap::new()).unwrap();
        let routes = build_routes(test_state(), Arc::new(HealthState::new()), &config);
        assert!(routes.is_ok());
    }

    #[test]
    fn test_build_routes_rejects_malformed_origin() {
        let vars = std::collections::HashMap::from([(
            "CORS_ORIGIN".to_string(),
            "not\na\nheader".to_string(),
        )]);
        let config = Config::from_vars(&vars).unwrap();
        let routes = build_routes(test_state(), Arc::new(HealthState::new()), &config);
        assert!(matches!(routes, Err(PcError::Config(_))));
    }
}
