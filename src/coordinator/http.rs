//! HTTP API for the coordinator
//!
//! Thin JSON surface over [`Coordinator`]:
//! - `/data` for key/value reads, writes and deletes
//! - `/nodes` for membership
//! - `/status`, `/distribution`, `/placement` and `/metrics` for observation
//! - `/admin/*` for repair and verification

use axum::{
    error_handling::HandleErrorLayer,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::common::Error;
use crate::coordinator::Coordinator;
use crate::node::{HealthMonitor, NodeSummary};

/// Upper bound for a single request, quorum waits included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct CoordState {
    pub coordinator: Arc<Coordinator>,
    pub health: Option<Arc<HealthMonitor>>,
}

impl CoordState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            health: None,
        }
    }

    pub fn with_health(mut self, health: Arc<HealthMonitor>) -> Self {
        self.health = Some(health);
        self
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.to_http_status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        }
        (
            status,
            Json(json!({
                "error": self.to_string(),
                "retryable": self.is_retryable(),
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct PutRequest {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct AddNodeRequest {
    id: String,
    host: String,
    port: u16,
}

pub fn create_router(state: CoordState) -> Router {
    Router::new()
        .route("/data", post(put_data))
        .route("/data/:key", get(get_data).delete(delete_data))
        .route("/nodes", post(add_node).get(list_nodes))
        .route("/nodes/:id", get(get_node).delete(remove_node))
        .route("/status", get(status))
        .route("/distribution", get(distribution))
        .route("/placement/:key", get(placement))
        .route("/metrics", get(metrics_json))
        .route("/metrics/prometheus", get(metrics_prometheus))
        .route("/admin/repair/:key", post(admin_repair))
        .route("/admin/verify", get(admin_verify))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .timeout(REQUEST_TIMEOUT),
        )
        .with_state(state)
}

async fn handle_middleware_error(err: tower::BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unhandled internal error: {}", err),
        )
    }
}

async fn put_data(
    State(state): State<CoordState>,
    Json(req): Json<PutRequest>,
) -> Result<impl IntoResponse, Error> {
    if req.key.is_empty() {
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "key must not be empty" })),
        ));
    }
    state.coordinator.put(&req.key, &req.value).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "status": "stored", "key": req.key })),
    ))
}

async fn get_data(
    State(state): State<CoordState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, Error> {
    match state.coordinator.get(&key).await {
        Some(value) => Ok(Json(json!({ "key": key, "value": value }))),
        None => Err(Error::NotFound(key)),
    }
}

async fn delete_data(
    State(state): State<CoordState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, Error> {
    if state.coordinator.delete(&key).await {
        Ok(Json(json!({ "status": "deleted", "key": key })))
    } else {
        Err(Error::NotFound(key))
    }
}

async fn add_node(
    State(state): State<CoordState>,
    Json(req): Json<AddNodeRequest>,
) -> impl IntoResponse {
    if req.id.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "node id must not be empty" })),
        );
    }
    if state.coordinator.add_node(&req.id, &req.host, req.port) {
        (
            StatusCode::CREATED,
            Json(json!({ "status": "added", "id": req.id })),
        )
    } else {
        (
            StatusCode::CONFLICT,
            Json(json!({ "error": format!("node {} already exists", req.id) })),
        )
    }
}

async fn list_nodes(State(state): State<CoordState>) -> Json<Vec<NodeSummary>> {
    Json(
        state
            .coordinator
            .all_units()
            .iter()
            .map(|unit| unit.summary())
            .collect(),
    )
}

async fn get_node(
    State(state): State<CoordState>,
    Path(id): Path<String>,
) -> Result<Json<NodeSummary>, Error> {
    state
        .coordinator
        .ring()
        .get(&id)
        .map(|unit| Json(unit.summary()))
        .ok_or_else(|| Error::NotFound(format!("node {}", id)))
}

async fn remove_node(
    State(state): State<CoordState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, Error> {
    if state.coordinator.remove_node(&id) {
        Ok(Json(json!({ "status": "removed", "id": id })))
    } else {
        Err(Error::NotFound(format!("node {}", id)))
    }
}

async fn status(State(state): State<CoordState>) -> impl IntoResponse {
    Json(state.coordinator.status())
}

async fn distribution(State(state): State<CoordState>) -> impl IntoResponse {
    Json(state.coordinator.data_distribution())
}

/// Ring walk for a key, without touching any unit
async fn placement(State(state): State<CoordState>, Path(key): Path<String>) -> impl IntoResponse {
    let coordinator = &state.coordinator;
    Json(
        coordinator
            .ring()
            .describe_placement(&key, coordinator.replication_factor()),
    )
}

async fn metrics_json(State(state): State<CoordState>) -> impl IntoResponse {
    Json(state.coordinator.metrics().snapshot())
}

async fn metrics_prometheus(State(state): State<CoordState>) -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.coordinator.metrics().to_prometheus(),
    )
}

async fn admin_repair(
    State(state): State<CoordState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, Error> {
    let report = crate::ops::repair_key(&state.coordinator, &key).await?;
    Ok(Json(json!({ "status": "ok", "report": report })))
}

async fn admin_verify(State(state): State<CoordState>) -> Result<impl IntoResponse, Error> {
    let report = crate::ops::verify_cluster(&state.coordinator).await?;
    Ok(Json(json!({ "status": "ok", "report": report })))
}

/// Degraded as soon as one unit is inactive, unavailable with none active
async fn health(State(state): State<CoordState>) -> impl IntoResponse {
    let units = state.coordinator.all_units();
    let active = units.iter().filter(|u| u.is_active()).count();
    let failed = state
        .health
        .as_ref()
        .map(|monitor| monitor.failed_nodes())
        .unwrap_or_default();

    let (code, label) = if active == 0 {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    } else if active < units.len() {
        (StatusCode::OK, "degraded")
    } else {
        (StatusCode::OK, "healthy")
    };

    (
        code,
        Json(json!({
            "status": label,
            "active_units": active,
            "total_units": units.len(),
            "failed_nodes": failed,
            "is_rebalancing": state.coordinator.is_rebalancing(),
            "version": crate::VERSION,
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::CoordinatorConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<Coordinator>) {
        let coordinator = Arc::new(Coordinator::new(&CoordinatorConfig::default()));
        for (i, id) in ["n1", "n2", "n3"].iter().enumerate() {
            assert!(coordinator.add_node(id, "localhost", 8080 + i as u16));
        }
        (create_router(CoordState::new(coordinator.clone())), coordinator)
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_get_delete_roundtrip() {
        let (app, _) = app();

        let response = app
            .clone()
            .oneshot(json_request("POST", "/data", json!({"key": "user:1", "value": "alice"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::get("/data/user:1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["value"], "alice");

        let response = app
            .clone()
            .oneshot(Request::delete("/data/user:1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/data/user:1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_put_without_units_is_unavailable() {
        let coordinator = Arc::new(Coordinator::new(&CoordinatorConfig::default()));
        let app = create_router(CoordState::new(coordinator));

        let response = app
            .oneshot(json_request("POST", "/data", json!({"key": "k", "value": "v"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["retryable"], true);
    }

    #[tokio::test]
    async fn test_node_membership() {
        let (app, coordinator) = app();

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/nodes",
                json!({"id": "n4", "host": "localhost", "port": 8083}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app
            .clone()
            .oneshot(json_request(
                "POST",
                "/nodes",
                json!({"id": "n4", "host": "localhost", "port": 8083}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(Request::get("/nodes").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let nodes = body_json(response).await;
        assert_eq!(nodes.as_array().unwrap().len(), 4);

        let response = app
            .clone()
            .oneshot(Request::get("/nodes/n4").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(response).await["port"], 8083);

        let response = app
            .clone()
            .oneshot(Request::delete("/nodes/n4").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::delete("/nodes/n4").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        coordinator.wait_for_rebalance().await;
    }

    #[tokio::test]
    async fn test_status_and_health() {
        let (app, coordinator) = app();
        coordinator.wait_for_rebalance().await;

        let response = app
            .clone()
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = body_json(response).await;
        assert_eq!(status["total_units"], 3);
        assert_eq!(status["is_rebalancing"], false);

        coordinator.ring().get("n2").unwrap().set_active(false);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let health = body_json(response).await;
        assert_eq!(health["status"], "degraded");
        assert_eq!(health["version"], crate::VERSION);
    }

    #[tokio::test]
    async fn test_prometheus_metrics() {
        let (app, coordinator) = app();
        coordinator.put("k", "v").await.unwrap();

        let response = app
            .oneshot(
                Request::get("/metrics/prometheus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("ringkv_writes_total"));
    }
}
