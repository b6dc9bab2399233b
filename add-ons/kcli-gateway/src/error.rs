//! HTTP mapping for the shared error taxonomy. Every error body carries the
//! request id so TUI panes and logs can be correlated.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use kcli_core::Error;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
    #[serde(rename = "requestId")]
    pub request_id: String,
}

/// Error plus the request id captured from middleware.
#[derive(Debug)]
pub struct ApiError {
    pub inner: Error,
    pub request_id: String,
}

impl ApiError {
    pub fn new(inner: Error, request_id: impl Into<String>) -> Self {
        Self {
            inner,
            request_id: request_id.into(),
        }
    }
}

pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::AlreadyExists(_) | Error::Conflict(_) | Error::Aborted(_) => StatusCode::CONFLICT,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        Error::ResourceExhausted(_) | Error::BudgetExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
        Error::FailedPrecondition(_) | Error::Disabled(_) => StatusCode::PRECONDITION_FAILED,
        Error::Unavailable(_) | Error::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::Cancelled(_) => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.inner);
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.inner.code(),
                message: self.inner.message().to_string(),
                request_id: self.request_id.clone(),
            },
        };
        let mut response = (status, Json(body)).into_response();
        if let Ok(value) = self.request_id.parse() {
            response.headers_mut().insert("x-request-id", value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(status_for(&Error::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&Error::Unauthenticated("x".into())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&Error::ResourceExhausted("x".into())),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(&Error::Transient("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&Error::DeadlineExceeded("x".into())),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
