//! HTTP API error types and status mapping

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::Json;
use proctor_webrtc::Error as CoreError;
use serde::Serialize;
use thiserror::Error;

/// HTTP server error types
#[derive(Debug, Error)]
pub enum Error {
    /// Server error (bind, listen)
    #[error("Server error: {0}")]
    ServerError(String),

    /// Session core error
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Result type for HTTP server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Error type (e.g., "conflict", "not_found", "upstream")
    pub error_type: String,
    /// Human-readable error message
    pub message: String,
}

/// Handler error: status plus JSON body
pub type ApiError = (StatusCode, Json<ErrorResponse>);

/// Short machine-readable name for a core error
pub fn error_type(e: &CoreError) -> &'static str {
    match e {
        CoreError::InvalidConfig(_) => "invalid_config",
        CoreError::InvalidRequest(_) => "invalid_request",
        CoreError::Conflict { .. } => "conflict",
        CoreError::NotFound(_) => "not_found",
        CoreError::Upstream(_) | CoreError::Http(_) => "upstream",
        CoreError::Timeout(_) => "timeout",
        CoreError::NegotiationFailed { .. } => "negotiation_failed",
        CoreError::InvalidSdp(_) => "invalid_sdp",
        CoreError::InvalidState(_) => "invalid_state",
        CoreError::InvalidTransition { .. } => "invalid_transition",
        CoreError::SessionClosed(_) => "session_closed",
        CoreError::CapacityExceeded(_) => "capacity_exceeded",
        CoreError::Serialization(_) | CoreError::Io(_) => "internal",
    }
}

/// HTTP status for a core error
///
/// `NegotiationFailed` takes the status of its cause.
pub fn status_for(e: &CoreError) -> StatusCode {
    match e {
        CoreError::Conflict { .. }
        | CoreError::InvalidState(_)
        | CoreError::InvalidTransition { .. }
        | CoreError::SessionClosed(_) => StatusCode::CONFLICT,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::InvalidRequest(_) | CoreError::InvalidSdp(_) => StatusCode::BAD_REQUEST,
        CoreError::Upstream(_) | CoreError::Http(_) => StatusCode::BAD_GATEWAY,
        CoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        CoreError::NegotiationFailed { source, .. } => status_for(source),
        CoreError::CapacityExceeded(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Map core errors to HTTP status codes and structured responses
pub fn map_core_error(e: CoreError) -> ApiError {
    let status = status_for(&e);
    if status.is_server_error() {
        tracing::warn!("Request failed with {}: {}", status, e);
    } else {
        tracing::debug!("Request rejected with {}: {}", status, e);
    }

    (
        status,
        Json(ErrorResponse {
            error_type: error_type(&e).to_string(),
            message: e.to_string(),
        }),
    )
}

/// Error for a malformed request the core never saw
pub fn bad_request(message: impl Into<String>) -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error_type: "invalid_request".to_string(),
            message: message.into(),
        }),
    )
}

/// Error for a JSON body that failed to extract (syntax, missing fields,
/// wrong content type), keeping axum's status
pub fn json_rejection(rejection: JsonRejection) -> ApiError {
    let status = rejection.status();
    let message = rejection.body_text();
    tracing::debug!("Rejected JSON body with {}: {}", status, message);

    (
        status,
        Json(ErrorResponse {
            error_type: "invalid_request".to_string(),
            message,
        }),
    )
}
