//! Cluster lifecycle and overview endpoints.

use crate::middleware::RequestId;
use crate::routes::{err, etagged_json, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use futures_util::Stream;
use kcli_core::{CacheKey, CacheShape, ConnectionDescriptor, Error};
use serde::Deserialize;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub in_cluster: bool,
}

pub async fn list(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let entries = state.registry.list().await;
    Json(serde_json::json!({ "clusters": entries }))
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Json(body): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let descriptor = ConnectionDescriptor {
        kubeconfig: body.kubeconfig,
        context: body.context,
        in_cluster: body.in_cluster,
    };
    let entry = state
        .registry
        .register(body.name, descriptor)
        .await
        .map_err(|e| err(e, &rid))?;
    // Watchers start only when a live client exists; reconnect restarts them.
    if let Ok(handle) = state.registry.get(&entry.id) {
        if let Ok(client) = handle.client().await {
            state.hub.start_cluster(&entry.id, &client);
        }
    }
    Ok((axum::http::StatusCode::CREATED, Json(entry)))
}

pub async fn get_one(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<kcli_core::ClusterEntry>> {
    let handle = state.registry.get(&id).map_err(|e| err(e, &rid))?;
    Ok(Json(handle.entry().await))
}

pub async fn deregister(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.hub.stop_cluster(&id);
    state
        .registry
        .deregister(&id)
        .await
        .map_err(|e| err(e, &rid))?;
    Ok(Json(serde_json::json!({"deregistered": id})))
}

pub async fn reconnect(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Path(id): Path<String>,
) -> ApiResult<Json<kcli_core::ClusterEntry>> {
    state.hub.stop_cluster(&id);
    let entry = state.registry.reconnect(&id).await.map_err(|e| err(e, &rid))?;
    if let Ok(handle) = state.registry.get(&id) {
        if let Ok(client) = handle.client().await {
            client.breaker().reset();
            state.hub.start_cluster(&id, &client);
        }
    }
    Ok(Json(entry))
}

/// Node/pod/namespace counts and the most recent warning events.
async fn overview_body(state: &AppState, id: &str) -> Result<serde_json::Value, Error> {
    let access = state.access(id).await?;
    let nodes = access
        .list_typed_cluster::<k8s_openapi::api::core::v1::Node>()
        .await?;
    let namespaces = access
        .list_typed_cluster::<k8s_openapi::api::core::v1::Namespace>()
        .await?;
    let pods = access
        .list_typed::<k8s_openapi::api::core::v1::Pod>(None)
        .await?;
    let events = access.events(None).await?;

    if let Ok(handle) = state.registry.get(id) {
        handle.set_node_count(nodes.len() as u32).await;
    }

    let mut warnings: Vec<&k8s_openapi::api::core::v1::Event> = events
        .iter()
        .filter(|e| e.type_.as_deref() == Some("Warning"))
        .collect();
    warnings.sort_by(|a, b| {
        let at = |e: &k8s_openapi::api::core::v1::Event| {
            e.last_timestamp.as_ref().map(|t| t.0).or_else(|| {
                e.event_time.as_ref().map(|t| t.0)
            })
        };
        at(b).cmp(&at(a))
    });
    let top_warnings: Vec<serde_json::Value> = warnings
        .iter()
        .take(5)
        .map(|e| {
            serde_json::json!({
                "reason": e.reason,
                "message": e.message,
                "namespace": e.metadata.namespace,
                "object": e.involved_object.name,
                "count": e.count,
            })
        })
        .collect();

    Ok(serde_json::json!({
        "cluster": id,
        "nodes": nodes.len(),
        "pods": pods.len(),
        "namespaces": namespaces.len(),
        "warnings": top_warnings,
    }))
}

fn overview_key(id: &str) -> CacheKey {
    CacheKey {
        cluster: id.to_string(),
        namespace: None,
        kinds: Vec::new(),
        filters: String::new(),
        shape: CacheShape::Overview,
    }
}

pub async fn overview(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Path(id): Path<String>,
    headers: axum::http::HeaderMap,
) -> ApiResult<axum::response::Response> {
    let key = overview_key(&id);
    let value = state
        .cache
        .get_or_build(&key, state.settings.cache_ttl, || async {
            overview_body(&state, &id).await
        })
        .await
        .map_err(|e| err(e, &rid))?;
    let if_none_match = headers
        .get(axum::http::header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());
    Ok(etagged_json(
        &value.fingerprint,
        if_none_match,
        value.body.clone(),
        &rid,
    ))
}

/// Continuous overview frames; ids are monotonic within the session.
pub async fn overview_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let interval = state.settings.overview_stream_interval;
    let stream = async_stream::stream! {
        let mut frame_id: u64 = 0;
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let key = overview_key(&id);
            let outcome = state
                .cache
                .get_or_build(&key, state.settings.cache_ttl, || async {
                    overview_body(&state, &id).await
                })
                .await;
            frame_id += 1;
            let event = match outcome {
                Ok(value) => SseEvent::default()
                    .event("overview")
                    .id(frame_id.to_string())
                    .data(value.body.to_string()),
                Err(e) => SseEvent::default()
                    .event("error")
                    .id(frame_id.to_string())
                    .data(
                        serde_json::json!({"code": e.code(), "message": e.to_string()})
                            .to_string(),
                    ),
            };
            yield Ok(event);
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub namespace: Option<String>,
}

pub async fn events(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let access = state.access(&id).await.map_err(|e| err(e, &rid))?;
    let events = access
        .events(query.namespace.as_deref())
        .await
        .map_err(|e| err(e, &rid))?;
    Ok(Json(serde_json::json!({ "events": events })))
}
