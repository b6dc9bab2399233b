//! Route table for `/api/v1` plus the small version/health/metrics handlers.

pub mod clusters;
pub mod exec;
pub mod resources;
pub mod streams;
pub mod topology;

use crate::error::ApiError;
use crate::middleware::RequestId;
use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

/// Attaches the request id to a core error.
pub fn err(inner: kcli_core::Error, rid: &RequestId) -> ApiError {
    ApiError::new(inner, rid.0.clone())
}

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/version", get(version))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/clusters", get(clusters::list).post(clusters::register))
        .route(
            "/clusters/:id",
            get(clusters::get_one).delete(clusters::deregister),
        )
        .route("/clusters/:id/reconnect", post(clusters::reconnect))
        .route("/clusters/:id/overview", get(clusters::overview))
        .route(
            "/clusters/:id/overview/stream",
            get(clusters::overview_stream),
        )
        .route("/clusters/:id/resources/:kind", get(resources::list))
        .route(
            "/clusters/:id/resources/:kind/:ns/:name",
            get(resources::get_one)
                .put(resources::apply)
                .delete(resources::delete),
        )
        .route("/clusters/:id/topology", get(topology::build))
        .route("/clusters/:id/topology/export", post(topology::export))
        .route("/clusters/:id/events", get(clusters::events))
        .route("/ws/resources", get(streams::ws_resources))
        .route("/ws/events", get(streams::ws_events))
        .route("/clusters/:id/pods/:ns/:name/logs", get(streams::pod_logs))
        .route("/clusters/:id/pods/:ns/:name/exec", get(exec::pod_exec))
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// 200 when serving, 503 while draining or with no registered cluster.
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.is_draining() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "draining"})),
        );
    }
    if state.registry.is_empty() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "no-cluster"})),
        );
    }
    (StatusCode::OK, Json(serde_json::json!({"status": "ready"})))
}

/// Prometheus text format; point-in-time gauges are refreshed at scrape.
async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state
        .metrics
        .cache_hits
        .set(state.cache.hit_count() as i64);
    state
        .metrics
        .cache_misses
        .set(state.cache.miss_count() as i64);
    state.metrics.watch_lag.set(state.hub.total_lag() as i64);
    state
        .metrics
        .subscribers
        .set(state.hub.subscriber_count() as i64);
    for entry in state.registry.list().await {
        if let Ok(handle) = state.registry.get(&entry.id) {
            if let Ok(client) = handle.client().await {
                let value = match client.breaker().state() {
                    kcli_core::BreakerState::Closed => 0,
                    kcli_core::BreakerState::HalfOpen => 1,
                    kcli_core::BreakerState::Open => 2,
                };
                state
                    .metrics
                    .breaker_state
                    .with_label_values(&[entry.id.as_str()])
                    .set(value);
            }
        }
    }
    state.metrics.encode()
}

/// Shared ETag handling: if the client already holds this fingerprint, send
/// 304 with no body; otherwise tag the JSON response.
pub fn etagged_json(
    fingerprint: &str,
    if_none_match: Option<&str>,
    body: serde_json::Value,
    rid: &RequestId,
) -> axum::response::Response {
    let etag = format!("\"{fingerprint}\"");
    if if_none_match.map(|v| v == etag).unwrap_or(false) {
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        if let Ok(value) = etag.parse() {
            response.headers_mut().insert(axum::http::header::ETAG, value);
        }
        return response;
    }
    let mut response = Json(body).into_response();
    if let Ok(value) = etag.parse() {
        response.headers_mut().insert(axum::http::header::ETAG, value);
    }
    if let Ok(value) = rid.0.parse() {
        response
            .headers_mut()
            .insert("x-request-id", value);
    }
    response
}
