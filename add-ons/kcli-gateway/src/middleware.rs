//! Request id, bearer auth, deadline injection and per-request metrics.

use crate::error::{ApiError, ErrorBody, ErrorDetail};
use crate::state::{AppState, AuthMode};
use axum::body::Body;
use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use kcli_core::Error;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Request id carried through extensions so handlers and error bodies agree.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

pub fn request_id_of(req_parts: &axum::http::Extensions) -> String {
    req_parts
        .get::<RequestId>()
        .map(|r| r.0.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Attaches a request id (honouring an inbound one), stamps the response and
/// records route metrics.
pub async fn observe(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    request
        .extensions_mut()
        .insert(RequestId(request_id.clone()));

    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let started = Instant::now();
    state.metrics.in_flight.inc();
    let mut response = next.run(request).await;
    state.metrics.in_flight.dec();

    let status = response.status().as_u16().to_string();
    state
        .metrics
        .requests_total
        .with_label_values(&[route.as_str(), status.as_str()])
        .inc();
    state
        .metrics
        .request_duration
        .with_label_values(&[route.as_str()])
        .observe(started.elapsed().as_secs_f64());

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    tracing::info!(
        target: "kcli::gateway",
        %request_id,
        route = %route,
        status = %response.status(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// Bearer auth; `open` mode admits everything.
pub async fn authenticate(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if let AuthMode::Required { token } = &state.settings.auth {
        let supplied = request
            .headers()
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if supplied != Some(token.as_str()) {
            let request_id = request_id_of(request.extensions());
            return ApiError::new(
                Error::Unauthenticated("missing or invalid bearer token".into()),
                request_id,
            )
            .into_response();
        }
    }
    next.run(request).await
}

/// Caps every request at the configured deadline.
pub async fn deadline(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let request_id = request_id_of(request.extensions());
    match tokio::time::timeout(state.settings.request_deadline, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError::new(
            Error::DeadlineExceeded(format!(
                "request exceeded {:?}",
                state.settings.request_deadline
            )),
            request_id,
        )
        .into_response(),
    }
}

/// Shape recovered panics like every other error body. The process keeps
/// serving; the panic is logged with whatever detail it carried.
pub fn panic_response(err: Box<dyn std::any::Any + Send + 'static>) -> axum::http::Response<Body> {
    let detail = if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    };
    tracing::error!(target: "kcli::gateway", panic = %detail, "recovered handler panic");
    let body = ErrorBody {
        error: ErrorDetail {
            code: "Internal",
            message: "internal error".to_string(),
            request_id: "unknown".to_string(),
        },
    };
    (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(body)).into_response()
}
