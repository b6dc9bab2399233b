//! Interactive exec: a binary-frame multiplex over one WebSocket.
//!
//! Frames are JSON `{t, d}` with base64 payloads: `stdin`, `stdout`,
//! `resize` (payload `{"cols": n, "rows": n}`) and `close`. The remote
//! process is owned by the session; disconnect tears it down, and both the
//! idle and total session ceilings are enforced here.

use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use base64::Engine;
use futures_util::SinkExt;
use kube::api::TerminalSize;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

#[derive(Debug, Serialize, Deserialize)]
struct ExecFrame {
    t: String,
    #[serde(default)]
    d: String,
}

#[derive(Debug, Deserialize)]
struct ResizePayload {
    cols: u16,
    rows: u16,
}

#[derive(Debug, Deserialize)]
pub struct ExecQuery {
    #[serde(default)]
    pub container: Option<String>,
    /// Command tokens; defaults to a shell.
    #[serde(default)]
    pub command: Option<String>,
}

pub async fn pod_exec(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path((id, ns, name)): Path<(String, String, String)>,
    Query(query): Query<ExecQuery>,
) -> Response {
    ws.on_upgrade(move |socket| serve_exec(socket, state, id, ns, name, query))
}

fn frame(t: &str, data: &[u8]) -> String {
    serde_json::to_string(&ExecFrame {
        t: t.to_string(),
        d: base64::engine::general_purpose::STANDARD.encode(data),
    })
    .unwrap_or_default()
}

async fn serve_exec(
    mut socket: WebSocket,
    state: Arc<AppState>,
    cluster: String,
    namespace: String,
    pod: String,
    query: ExecQuery,
) {
    let access = match state.access(&cluster).await {
        Ok(access) => access,
        Err(e) => {
            let _ = socket.send(Message::Text(frame("error", e.to_string().as_bytes()))).await;
            return;
        }
    };
    let command: Vec<String> = query
        .command
        .as_deref()
        .map(|c| c.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    let mut process = match access
        .pod_exec(&namespace, &pod, query.container.clone(), command)
        .await
    {
        Ok(process) => process,
        Err(e) => {
            let _ = socket.send(Message::Text(frame("error", e.to_string().as_bytes()))).await;
            return;
        }
    };

    let Some(mut stdin) = process.stdin() else {
        let _ = socket
            .send(Message::Text(frame("error", b"exec stdin unavailable")))
            .await;
        return;
    };
    let Some(mut stdout) = process.stdout() else {
        let _ = socket
            .send(Message::Text(frame("error", b"exec stdout unavailable")))
            .await;
        return;
    };
    let mut resize_tx = process.terminal_size();

    // Remote output is pumped through a channel so the main loop stays a
    // single select over socket, output and deadlines.
    let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(32);
    let reader = tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if out_tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let started = Instant::now();
    let mut last_activity = Instant::now();
    let max_idle = state.settings.exec_max_idle;
    let max_session = state.settings.exec_max_session;

    loop {
        let idle_deadline = last_activity + max_idle;
        let session_deadline = started + max_session;
        let deadline = idle_deadline.min(session_deadline);

        tokio::select! {
            output = out_rx.recv() => {
                match output {
                    Some(bytes) => {
                        last_activity = Instant::now();
                        if socket.send(Message::Text(frame("stdout", &bytes))).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = socket.send(Message::Text(frame("close", b"process exited"))).await;
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                last_activity = Instant::now();
                let text = match message {
                    Message::Text(text) => text,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let Ok(parsed) = serde_json::from_str::<ExecFrame>(&text) else {
                    continue;
                };
                let payload = base64::engine::general_purpose::STANDARD
                    .decode(parsed.d.as_bytes())
                    .unwrap_or_default();
                match parsed.t.as_str() {
                    "stdin" => {
                        if stdin.write_all(&payload).await.is_err() {
                            break;
                        }
                        let _ = stdin.flush().await;
                    }
                    "resize" => {
                        if let (Some(tx), Ok(resize)) = (
                            resize_tx.as_mut(),
                            serde_json::from_slice::<ResizePayload>(&payload),
                        ) {
                            let _ = tx
                                .send(TerminalSize {
                                    width: resize.cols,
                                    height: resize.rows,
                                })
                                .await;
                        }
                    }
                    "close" => break,
                    _ => {}
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                let reason = if Instant::now() >= session_deadline {
                    "session duration limit"
                } else {
                    "idle timeout"
                };
                let _ = socket.send(Message::Text(frame("close", reason.as_bytes()))).await;
                break;
            }
        }
    }

    // Dropping the attached process closes the upstream connection, which
    // kills the remote PTY; the reader task ends with it.
    reader.abort();
    drop(process);
    tracing::debug!(
        target: "kcli::gateway",
        %cluster, %namespace, %pod,
        elapsed_s = started.elapsed().as_secs(),
        "exec session closed"
    );
}
