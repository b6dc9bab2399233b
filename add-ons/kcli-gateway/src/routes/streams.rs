//! WebSocket delta/event streams and the pod log tail.

use crate::middleware::RequestId;
use crate::routes::{err, ApiResult};
use crate::state::AppState;
use axum::body::Body;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use futures_util::StreamExt;
use kcli_core::{HubFrame, SubscriberFilter};
use serde::Deserialize;
use std::sync::Arc;

/// First client frame on either socket: scope selection.
#[derive(Debug, Default, Deserialize)]
struct SubscribeRequest {
    #[serde(default)]
    cluster: Option<String>,
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    kinds: Vec<String>,
}

pub async fn ws_resources(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.on_upgrade(move |socket| serve_subscription(socket, state, Vec::new()))
}

/// Same stream narrowed to cluster events.
pub async fn ws_events(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| serve_subscription(socket, state, vec!["Event".to_string()]))
}

async fn serve_subscription(mut socket: WebSocket, state: Arc<AppState>, forced_kinds: Vec<String>) {
    // The subscription scope arrives as the first text frame; everything
    // before a valid one is ignored.
    let request = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => {
                match serde_json::from_str::<SubscribeRequest>(&text) {
                    Ok(req) => break req,
                    Err(e) => {
                        let _ = socket
                            .send(Message::Text(
                                serde_json::json!({"error": format!("subscribe: {e}")})
                                    .to_string(),
                            ))
                            .await;
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => {}
            Some(Err(_)) => return,
        }
    };

    let filter = SubscriberFilter {
        cluster: request.cluster,
        namespace: request.namespace,
        kinds: if forced_kinds.is_empty() {
            request.kinds
        } else {
            forced_kinds
        },
    };
    let session = state.hub.subscribe(filter);
    let session_id = session.id();
    tracing::debug!(target: "kcli::gateway", session = session_id, "stream subscriber attached");

    loop {
        tokio::select! {
            frame = session.next() => {
                let Some(frame) = frame else { break };
                let payload = match &frame {
                    HubFrame::Delta(delta) => serde_json::json!({
                        "kind": delta.kind,
                        "op": delta.op,
                        "object": delta.object,
                        "rv": delta.rv,
                    }),
                    other => serde_json::to_value(other).unwrap_or_default(),
                };
                if socket.send(Message::Text(payload.to_string())).await.is_err() {
                    break;
                }
                if matches!(frame, HubFrame::Closed { .. }) {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
    state.hub.unsubscribe(session_id);
    tracing::debug!(target: "kcli::gateway", session = session_id, "stream subscriber detached");
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default, rename = "tailLines")]
    pub tail_lines: Option<i64>,
    /// Follow by default; `follow=false` returns a bounded snapshot.
    #[serde(default)]
    pub follow: Option<bool>,
}

/// Plain-text log tail with an idle timeout; pure passthrough otherwise.
pub async fn pod_logs(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    Path((id, ns, name)): Path<(String, String, String)>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Response> {
    let access = state.access(&id).await.map_err(|e| err(e, &rid))?;

    if query.follow == Some(false) {
        let text = access
            .pod_logs(&ns, &name, query.container.clone(), query.tail_lines.or(Some(200)))
            .await
            .map_err(|e| err(e, &rid))?;
        return Ok(text.into_response());
    }

    let stream = access
        .pod_log_stream(&ns, &name, query.container.clone(), query.tail_lines.or(Some(50)))
        .await
        .map_err(|e| err(e, &rid))?;
    let idle = state.settings.log_idle_timeout;
    let body_stream = async_stream::stream! {
        let mut stream = std::pin::pin!(stream);
        loop {
            match tokio::time::timeout(idle, stream.next()).await {
                Ok(Some(Ok(mut line))) => {
                    line.push('\n');
                    yield Ok::<_, std::io::Error>(axum::body::Bytes::from(line));
                }
                Ok(Some(Err(e))) => {
                    tracing::debug!(target: "kcli::gateway", error = %e, "log stream ended");
                    break;
                }
                Ok(None) => break,
                // Idle timeout: close the stream, the client can reopen.
                Err(_) => break,
            }
        }
    };
    Ok((
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(body_stream),
    )
        .into_response())
}
