use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use filebridge_types::DomainError;
use serde::Serialize;

/// The control adapter's error type. Unlike the teacher's own route
/// handlers (which return a bare `StatusCode` on failure), every variant
/// here carries a `DomainError` and renders the uniform JSON envelope from
/// SPEC_FULL §6 itself — no handler reconstructs that shape by hand.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(e: DomainError) -> Self {
        ApiError(e)
    }
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    success: bool,
    error: ErrorBody<'a>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: String,
    message: &'a str,
    details: &'a serde_json::Value,
    timestamp: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorEnvelope {
            success: false,
            error: ErrorBody {
                code: self.0.kind.to_string(),
                message: &self.0.message,
                details: &self.0.details,
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        };
        (status, Json(body)).into_response()
    }
}
