//! Coordinator server for the agent orchestrator
//!
//! Single-port HTTP server carrying the operator API, the runner
//! claim/heartbeat surface, and the session endpoints the runner gateway
//! forwards to.

mod agents;
mod auth;
mod queue;
mod registry;
mod routes;
mod state;

use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::registry::RegistryConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "coordinator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine data directory
    let data_dir = std::env::var("AGENT_ORCHESTRATOR_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".ao-data"));
    let agents_dir = std::env::var("AGENT_ORCHESTRATOR_AGENTS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| data_dir.join("agents"));
    let port: u16 = std::env::var("AGENT_ORCHESTRATOR_PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8090);

    tracing::info!("Using data directory: {:?}", data_dir);
    tracing::info!("Serving agent blueprints from: {:?}", agents_dir);

    let app_state = AppState::new(data_dir, agents_dir, RegistryConfig::from_env())
        .await
        .expect("Failed to initialize application state");

    // Background sweep marks silent runners stale and eventually removes them
    let registry = Arc::clone(app_state.registry());
    let sweeper = registry.start_sweeper();

    let app = Router::new()
        .merge(routes::health::router())
        .merge(routes::runs::router())
        .merge(routes::runner::router())
        .merge(routes::sessions::router())
        .merge(routes::agents::router())
        .with_state(app_state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Coordinator listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    registry.shutdown();
    let _ = sweeper.await;
    tracing::info!("Coordinator stopped");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
    tracing::info!("Shutdown signal received");
}
