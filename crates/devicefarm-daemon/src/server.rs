//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api;
use crate::state::{HubState, NodeState};

fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Routes served by a node
pub fn node_router(state: Arc<NodeState>) -> Router {
    Router::new()
        .route("/api/devices", get(api::list_devices))
        .route("/api/devices/{id}", get(api::get_device))
        .route("/api/devices/{id}/block", post(api::block_device))
        .route("/api/devices/{id}/unblock", post(api::unblock_device))
        .route(
            "/api/devices/{id}/session",
            post(api::begin_session).delete(api::end_session),
        )
        .route("/api/scan", post(api::trigger_scan))
        .route("/api/config", get(api::get_config))
        .layer(cors())
        .with_state(state)
}

/// Routes served by the hub
pub fn hub_router(state: Arc<HubState>) -> Router {
    Router::new()
        .route(
            "/devices",
            get(api::list_inventory).post(api::post_delta),
        )
        .layer(cors())
        .with_state(state)
}

/// Run a node: periodic sync, attach/detach trackers and the REST server
pub async fn run_node(state: Arc<NodeState>, bind: &str) -> Result<()> {
    let app = node_router(state.clone());

    // Start reconciliation in background
    let sync = state.sync.clone();
    tokio::spawn(async move { sync.run().await });

    for tracker in &state.trackers {
        tracker.start().await;
    }

    run_http(app, bind, "node").await
}

/// Run the hub inventory server
pub async fn run_hub(state: Arc<HubState>, bind: &str) -> Result<()> {
    run_http(hub_router(state), bind, "hub").await
}

async fn run_http(app: Router, bind: &str, role: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, role, "Starting web server");
    axum::serve(listener, app).await?;
    Ok(())
}
