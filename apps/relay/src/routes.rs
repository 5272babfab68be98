//! Public HTTP API of the relay
//!
//! Every `/api/v1/*` call is authenticated with the shared secret as a Bearer
//! token and forwarded through the tunnel. `/health` is open.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::{debug, warn};
use tts_tunnel_common::{
    MessageType, TunnelMessage, decode_body, encode_body,
    validation::{sanitize_header_name, sanitize_header_value, validate_path},
};

use crate::{
    auth::{TokenVerifier, extract_bearer},
    error_handling::{ApiError, json_error},
    server::TunnelServer,
};

const DEFAULT_SAMPLE_RATE: u64 = 24000;

/// Request headers that describe the public hop and are not forwarded
const HOP_HEADERS: &[&str] = &[
    "authorization",
    "host",
    "content-length",
    "connection",
    "transfer-encoding",
    "upgrade",
    "keep-alive",
];

/// Shared application state.
#[derive(Clone)]
pub struct RelayState {
    pub tunnel: TunnelServer,
    pub verifier: Arc<dyn TokenVerifier>,
    pub request_timeout: Duration,
    pub started_at: Instant,
}

impl RelayState {
    pub fn new(tunnel: TunnelServer, verifier: impl TokenVerifier, request_timeout: Duration) -> Self {
        Self {
            tunnel,
            verifier: Arc::new(verifier),
            request_timeout,
            started_at: Instant::now(),
        }
    }

    fn uptime_secs(&self) -> f64 {
        (self.started_at.elapsed().as_secs_f64() * 10.0).round() / 10.0
    }
}

pub fn build_router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/{*path}", any(forward))
        .with_state(state)
}

/// `GET /health`: unauthenticated liveness
async fn health(State(state): State<RelayState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "tunnel_connected": state.tunnel.has_client(),
        "connected_clients": state.tunnel.connected_clients(),
        "uptime_secs": state.uptime_secs(),
    }))
}

/// `GET /api/v1/status`: relay status merged with the worker's own status
async fn status(State(state): State<RelayState>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }

    let mut body = json!({
        "relay": "ok",
        "tunnel_connected": state.tunnel.has_client(),
        "connected_clients": state.tunnel.connected_clients(),
        "pending_requests": state.tunnel.pending_count(),
        "uptime_seconds": state.uptime_secs(),
    });

    if state.tunnel.has_client() {
        let local = match state
            .tunnel
            .send_request("GET", "/api/v1/status", None, None, Some(state.request_timeout))
            .await
        {
            Ok(reply) => serde_json::from_str::<Value>(reply.body.as_deref().unwrap_or("{}"))
                .unwrap_or_else(|e| json!({ "error": format!("Invalid status body: {}", e) })),
            Err(e) => json!({ "error": e.to_string() }),
        };
        body["local"] = local;
    }

    Json(body).into_response()
}

/// `ANY /api/v1/*path`: forward through the tunnel
async fn forward(
    State(state): State<RelayState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(denied) = authorize(&state, &headers) {
        return denied;
    }

    let raw_path = uri.path_and_query().map_or(uri.path(), |pq| pq.as_str());
    let path = match validate_path(raw_path) {
        Ok(path) => path,
        Err(e) => return json_error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let request = build_request(&method, &path, &headers, &body);
    debug!("Forwarding {} {}", method, path);

    match state.tunnel.forward(request, Some(state.request_timeout)).await {
        Ok(reply) => reply_to_response(reply),
        Err(e) => {
            warn!("Forwarding {} {} failed: {}", method, path, e);
            ApiError(e).into_response()
        }
    }
}

fn authorize(state: &RelayState, headers: &HeaderMap) -> Result<(), Response> {
    match extract_bearer(headers) {
        Some(token) if state.verifier.verify(token) => Ok(()),
        _ => Err(json_error(
            StatusCode::UNAUTHORIZED,
            "Unauthorized: provide API key via Authorization: Bearer <key>",
        )),
    }
}

/// Build the REQUEST frame for an inbound HTTP call
pub fn build_request(method: &Method, path: &str, headers: &HeaderMap, body: &Bytes) -> TunnelMessage {
    let mut forwarded = HashMap::new();
    for (name, value) in headers {
        if HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        let Ok(value) = value.to_str() else {
            continue;
        };
        match (sanitize_header_name(name.as_str()), sanitize_header_value(value)) {
            (Ok(name), Ok(value)) => {
                forwarded
                    .entry(name)
                    .and_modify(|existing: &mut String| {
                        existing.push_str(", ");
                        existing.push_str(&value);
                    })
                    .or_insert(value);
            }
            _ => debug!("Dropping unforwardable header {}", name),
        }
    }

    let request = TunnelMessage::request("", method.as_str(), path).with_headers(forwarded);
    if body.is_empty() {
        return request;
    }
    match std::str::from_utf8(body) {
        Ok(text) => request.with_body(text),
        Err(_) => request.with_binary_body(encode_body(body)),
    }
}

/// Turn the worker's reply into the public HTTP response
pub fn reply_to_response(reply: TunnelMessage) -> Response {
    if reply.kind == MessageType::Error {
        let code = if reply.status_code == 200 {
            500
        } else {
            reply.status_code
        };
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return json_error(status, reply.error.unwrap_or_else(|| "Worker error".to_string()));
    }

    let status = StatusCode::from_u16(reply.status_code).unwrap_or(StatusCode::BAD_GATEWAY);
    let content_type = header_value(&reply.headers, "content-type");
    let body = reply.body.unwrap_or_default();

    if reply.body_binary {
        if let Some(response) = audio_response(status, &body) {
            return response;
        }
        match decode_body(&body) {
            Ok(bytes) => {
                let content_type = content_type.unwrap_or("application/octet-stream");
                return with_content_type(status, content_type, bytes);
            }
            Err(e) => debug!("Binary body is not base64 ({}), passing through", e),
        }
    }

    let body = if body.is_empty() { "{}".to_string() } else { body };
    with_content_type(status, content_type.unwrap_or("application/json"), body)
}

/// Synthesis results arrive as JSON with base64 `audio`; serve the raw audio
fn audio_response(status: StatusCode, body: &str) -> Option<Response> {
    let data: Value = serde_json::from_str(body).ok()?;
    let audio = decode_body(data.get("audio")?.as_str()?).ok()?;
    let format = data.get("format").and_then(Value::as_str).unwrap_or("wav");

    let duration = data
        .get("duration_seconds")
        .map_or_else(|| "0".to_string(), json_scalar);
    let sample_rate = data
        .get("sample_rate")
        .map_or_else(|| DEFAULT_SAMPLE_RATE.to_string(), json_scalar);
    let voice_id = data.get("voice_id").map(json_scalar).unwrap_or_default();

    let mut headers = HeaderMap::new();
    insert_header(&mut headers, header::CONTENT_TYPE, &format!("audio/{}", format));
    insert_header(&mut headers, HeaderName::from_static("x-duration-seconds"), &duration);
    insert_header(&mut headers, HeaderName::from_static("x-sample-rate"), &sample_rate);
    insert_header(&mut headers, HeaderName::from_static("x-voice-id"), &voice_id);

    Some((status, headers, audio).into_response())
}

fn json_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => debug!("Skipping invalid value for header {}", name),
    }
}

fn with_content_type(status: StatusCode, content_type: &str, body: impl IntoResponse) -> Response {
    let mut headers = HeaderMap::new();
    insert_header(&mut headers, header::CONTENT_TYPE, content_type);
    (status, headers, body).into_response()
}
