//! Error handling and sanitization for the relay HTTP layer
//!
//! Tunnel failures become 401/503/504 with their message; anything else is
//! logged in full and returned as a generic 500.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;
use tts_tunnel_common::TunnelError;

/// HTTP status for a tunnel error
pub fn status_for(e: &TunnelError) -> StatusCode {
    match e {
        TunnelError::Authentication(_) => StatusCode::UNAUTHORIZED,
        TunnelError::ConnectionError(_)
        | TunnelError::ConnectionRefused(_)
        | TunnelError::WebSocketError(_)
        | TunnelError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
        TunnelError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Sanitize error messages for client responses
///
/// Logs the full error internally but returns a generic message to the client
///
/// # Examples
///
/// ```
/// use tts_tunnel_common::TunnelError;
/// use tts_tunnel_relay::error_handling::sanitize_error;
///
/// let err = TunnelError::InternalError("pool exhausted at 10.0.1.5".to_string());
/// assert_eq!(sanitize_error(&err), "Internal server error");
/// ```
pub fn sanitize_error(e: &TunnelError) -> String {
    error!("Internal error: {:#}", e);
    "Internal server error".to_string()
}

/// Message shown to HTTP callers: the error text when it is a tunnel
/// condition they can act on, a generic one otherwise
pub fn client_error_message(e: &TunnelError) -> String {
    if status_for(e) == StatusCode::INTERNAL_SERVER_ERROR {
        sanitize_error(e)
    } else {
        e.to_string()
    }
}

/// JSON `{"error": ...}` response with an explicit status
pub fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Error returned by relay handlers
#[derive(Debug)]
pub struct ApiError(pub TunnelError);

impl From<TunnelError> for ApiError {
    fn from(e: TunnelError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        json_error(status_for(&self.0), client_error_message(&self.0))
    }
}
