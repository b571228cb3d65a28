//! REST API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use devicefarm_core::{AddDelta, DeltaAction, DeviceDelta, DeviceId, RemoveDelta};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::state::{HubState, NodeState};

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn not_found() -> axum::response::Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new("Device not found")),
    )
        .into_response()
}

/// List all devices served by this node
pub async fn list_devices(
    State(state): State<Arc<NodeState>>,
) -> impl IntoResponse {
    Json(state.registry.list().await)
}

/// Get a specific device by ID
pub async fn get_device(
    State(state): State<Arc<NodeState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.registry.get(&DeviceId::new(id)).await {
        Some(device) => Json(device).into_response(),
        None => not_found(),
    }
}

/// Run a discovery pass now
pub async fn trigger_scan(
    State(state): State<Arc<NodeState>>,
) -> impl IntoResponse {
    info!("Manual scan triggered");

    let report = state.sync.sync_once().await;
    Json(serde_json::json!({
        "status": "completed",
        "completedAt": Utc::now(),
        "report": report,
    }))
}

/// Place an administrative hold on a device
pub async fn block_device(
    State(state): State<Arc<NodeState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    info!(device = %id, "Block requested");
    match state.registry.block(&DeviceId::new(id)).await {
        Some(device) => Json(device).into_response(),
        None => not_found(),
    }
}

pub async fn unblock_device(
    State(state): State<Arc<NodeState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    info!(device = %id, "Unblock requested");
    match state.registry.unblock(&DeviceId::new(id)).await {
        Some(device) => Json(device).into_response(),
        None => not_found(),
    }
}

/// Hand a device to a new session
pub async fn begin_session(
    State(state): State<Arc<NodeState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = DeviceId::new(id);
    if let Some(device) = state.registry.begin_session(&id).await {
        return Json(device).into_response();
    }
    if state.registry.contains(&id).await {
        (
            StatusCode::CONFLICT,
            Json(ApiError::new("Device is busy or blocked")),
        )
            .into_response()
    } else {
        not_found()
    }
}

/// Session end response
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionEnded {
    identifier: DeviceId,
    elapsed_millis: u64,
    cumulative_busy_millis: u64,
}

/// Release a device from its session
pub async fn end_session(
    State(state): State<Arc<NodeState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let id = DeviceId::new(id);
    match state.registry.end_session(&id).await {
        Some(elapsed_millis) => {
            let cumulative_busy_millis = state.registry.ledger().total(&id).await;
            Json(SessionEnded {
                identifier: id,
                elapsed_millis,
                cumulative_busy_millis,
            })
            .into_response()
        }
        None => not_found(),
    }
}

/// Get current configuration
pub async fn get_config(
    State(state): State<Arc<NodeState>>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "hostAddress": state.host_address,
        "hub": state.sync.has_hub(),
        "config": state.config,
    }))
}

/// Hub inventory query parameters
#[derive(Deserialize)]
pub struct DeltaQuery {
    /// Missing means add
    #[serde(default)]
    action: DeltaAction,
}

/// Apply a node's inventory delta
pub async fn post_delta(
    State(state): State<Arc<HubState>>,
    Query(query): Query<DeltaQuery>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let delta = match query.action {
        DeltaAction::Add => serde_json::from_value::<AddDelta>(body).map(DeviceDelta::Add),
        DeltaAction::Remove => serde_json::from_value::<RemoveDelta>(body).map(DeviceDelta::Remove),
    };
    let delta = match delta {
        Ok(delta) => delta,
        Err(e) => {
            warn!(action = query.action.as_str(), error = %e, "Rejected malformed delta");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiError::new(format!("Invalid {} delta: {}", query.action.as_str(), e))),
            )
                .into_response();
        }
    };

    debug!(action = query.action.as_str(), count = delta.len(), "Inventory delta received");
    let change = state.inventory.apply(delta).await;
    Json(change).into_response()
}

/// List the aggregated inventory of every node
pub async fn list_inventory(
    State(state): State<Arc<HubState>>,
) -> impl IntoResponse {
    Json(state.inventory.list().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CloudConfig, Config, HubConfig};
    use crate::server::{hub_router, node_router};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use devicefarm_core::{Device, DeviceClass, Platform};
    use devicefarm_discovery::{CloudDeviceSpec, DeviceTypeFilter};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Node whose only source is a configured cloud device
    async fn cloud_node(temp: &TempDir) -> Arc<NodeState> {
        let mut config = Config::default();
        config.workspace.root = temp.path().to_path_buf();
        config.node.device_types = DeviceTypeFilter::Real;
        config.node.host_address = Some("http://10.0.0.5:4723".to_string());
        config.hub = HubConfig::default();
        config.cloud = Some(CloudConfig {
            provider: "browserstack".to_string(),
            url: "https://hub.browserstack.com/wd/hub".to_string(),
            devices: vec![CloudDeviceSpec {
                identifier: Some("pixel-8".to_string()),
                name: "Pixel 8".to_string(),
                os_version: "14".to_string(),
                platform: Platform::Android,
            }],
        });
        NodeState::new(config).await.unwrap()
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_scan_then_session_lifecycle() {
        let temp = TempDir::new().unwrap();
        let state = cloud_node(&temp).await;
        let app = node_router(state.clone());

        let response = app.clone().oneshot(request("POST", "/api/scan")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let scan = body_json(response).await;
        assert_eq!(scan["report"]["added"], 1);
        assert!(state.trackers.is_empty());

        let response = app.clone().oneshot(request("GET", "/api/devices")).await.unwrap();
        let devices = body_json(response).await;
        assert_eq!(devices[0]["identifier"], "pixel-8");
        assert_eq!(devices[0]["cloudProvider"], "browserstack");

        let response = app
            .clone()
            .oneshot(request("POST", "/api/devices/pixel-8/session"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["busy"], true);

        let response = app
            .clone()
            .oneshot(request("POST", "/api/devices/pixel-8/session"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(request("DELETE", "/api/devices/pixel-8/session"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["identifier"], "pixel-8");
    }

    #[tokio::test]
    async fn test_block_and_missing_device() {
        let temp = TempDir::new().unwrap();
        let state = cloud_node(&temp).await;
        state
            .registry
            .upsert(Device::new("R1".into(), "Pixel 7", "14", Platform::Android, DeviceClass::Real))
            .await;
        let app = node_router(state);

        let response = app
            .clone()
            .oneshot(request("POST", "/api/devices/R1/block"))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["userBlocked"], true);

        let response = app
            .clone()
            .oneshot(request("POST", "/api/devices/R1/session"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(request("GET", "/api/devices/unknown"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_hub_applies_add_and_remove() {
        let state = HubState::new(Config::default());
        let app = hub_router(state.clone());

        let mut device = Device::new("C".into(), "Pixel 7", "14", Platform::Android, DeviceClass::Real);
        device.host_address = "http://10.0.0.5:4723".to_string();

        let response = app
            .clone()
            .oneshot(json_request(
                "/devices?action=add",
                serde_json::json!({ "devices": [device] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.inventory.len().await, 1);

        // Same identifier on another node is a separate entry
        let mut other = device.clone();
        other.host_address = "http://10.0.0.6:4723".to_string();
        app.clone()
            .oneshot(json_request("/devices", serde_json::json!({ "devices": [other] })))
            .await
            .unwrap();
        assert_eq!(state.inventory.len().await, 2);

        let removal = serde_json::json!({
            "devices": [{ "identifier": "C", "hostAddress": "http://10.0.0.5:4723" }]
        });
        let response = app
            .clone()
            .oneshot(json_request("/devices?action=remove", removal.clone()))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["removed"], 1);

        let response = app
            .clone()
            .oneshot(json_request("/devices?action=remove", removal))
            .await
            .unwrap();
        assert_eq!(body_json(response).await["removed"], 0);

        let response = app.clone().oneshot(request("GET", "/devices")).await.unwrap();
        let inventory = body_json(response).await;
        assert_eq!(inventory.as_array().unwrap().len(), 1);
        assert_eq!(inventory[0]["hostAddress"], "http://10.0.0.6:4723");
    }

    #[tokio::test]
    async fn test_hub_rejects_malformed_delta() {
        let app = hub_router(HubState::new(Config::default()));

        let response = app
            .oneshot(json_request(
                "/devices?action=remove",
                serde_json::json!({ "devices": [{ "identifier": "C" }] }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
