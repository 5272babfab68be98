//! Request handling on the worker side
//!
//! The tunnel clients hand each REQUEST to a [`RequestHandler`]. Closures work
//! directly; [`LocalServiceHandler`] forwards to an HTTP service on this host.

use anyhow::{Context, Result, bail};
use reqwest::{Client, Method};
use std::{
    future::Future,
    time::{Duration, Instant},
};
use tracing::debug;
use tts_tunnel_common::{
    MessageType, TunnelError, TunnelMessage, encode_body, headers_to_map,
};

/// Headers that only describe a single hop and are not copied across the tunnel
const HOP_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "upgrade",
];

/// Answers one forwarded REQUEST with a RESPONSE or ERROR.
///
/// The returned message's `request_id` is overwritten with the request's own.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: TunnelMessage)
    -> impl Future<Output = Result<TunnelMessage>> + Send;
}

impl<F, Fut> RequestHandler for F
where
    F: Fn(TunnelMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TunnelMessage>> + Send,
{
    fn handle(&self, request: TunnelMessage) -> impl Future<Output = Result<TunnelMessage>> + Send {
        self(request)
    }
}

/// Forwards REQUESTs to a local HTTP service (e.g., the TTS engine's API)
#[derive(Debug, Clone)]
pub struct LocalServiceHandler {
    base_url: String,
    client: Client,
}

impl LocalServiceHandler {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn forward(&self, request: TunnelMessage) -> Result<TunnelMessage> {
        let start_time = Instant::now();
        let request_id = request.request_id.clone().unwrap_or_default();
        let method = request.method.as_deref().unwrap_or("GET");
        let path = request.path.as_deref().unwrap_or("/");

        if request.kind != MessageType::Request {
            bail!("Cannot forward a {} message", request.kind);
        }

        let method = Method::from_bytes(method.as_bytes())
            .map_err(|_| TunnelError::HttpError(format!("Unsupported HTTP method: {}", method)))?;
        let url = format!("{}{}", self.base_url, path);
        debug!("Forwarding: {} {}", method, url);

        let mut req_builder = self.client.request(method, &url);
        for (name, value) in &request.headers {
            if HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                continue;
            }
            req_builder = req_builder.header(name, value);
        }

        if request.body.is_some() {
            let bytes = request.body_bytes().context("Failed to decode body")?;
            req_builder = req_builder.body(bytes);
        }

        let response = req_builder
            .send()
            .await
            .with_context(|| format!("Local service unavailable at {}", self.base_url))?;

        let status_code = response.status().as_u16();
        let mut headers = headers_to_map(response.headers());
        headers.retain(|name, _| !HOP_HEADERS.contains(&name.as_str()));
        let body_bytes = response
            .bytes()
            .await
            .context("Failed to read local service response")?;

        let reply = TunnelMessage::response(request_id, status_code).with_headers(headers);
        let reply = if body_bytes.is_empty() {
            reply
        } else if is_text(&reply) {
            match String::from_utf8(body_bytes.to_vec()) {
                Ok(text) => reply.with_body(text),
                Err(_) => reply.with_binary_body(encode_body(&body_bytes)),
            }
        } else {
            reply.with_binary_body(encode_body(&body_bytes))
        };

        debug!(
            "Response: {} ({}ms)",
            status_code,
            start_time.elapsed().as_millis()
        );
        Ok(reply)
    }
}

impl RequestHandler for LocalServiceHandler {
    fn handle(&self, request: TunnelMessage) -> impl Future<Output = Result<TunnelMessage>> + Send {
        self.forward(request)
    }
}

/// JSON and text bodies travel as-is; everything else is base64
fn is_text(reply: &TunnelMessage) -> bool {
    let content_type = reply
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.to_ascii_lowercase());

    match content_type {
        None => true,
        Some(ct) => ct.starts_with("text/") || ct.contains("json") || ct.contains("xml"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tts_tunnel_common::decode_body;
    use axum::{Router, body::Bytes, http::HeaderMap, routing::{get, post}};
    use tokio::net::TcpListener;

    async fn start_local_service() -> String {
        let app = Router::new()
            .route(
                "/api/v1/status",
                get(|| async { ([("content-type", "application/json")], r#"{"status":"ok"}"#) }),
            )
            .route(
                "/api/v1/tts/synthesize",
                post(|headers: HeaderMap, body: Bytes| async move {
                    let voice = headers
                        .get("x-voice-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("none")
                        .to_string();
                    let mut wav = b"RIFF".to_vec();
                    wav.extend_from_slice(&body);
                    ([("content-type", "audio/wav".to_string()), ("x-voice-id", voice)], wav)
                }),
            )
            .route(
                "/api/v1/echo",
                post(|body: Bytes| async move { ([("content-type", "application/octet-stream")], body) }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_closure_handler() {
        let handler = |request: TunnelMessage| async move {
            Ok::<_, anyhow::Error>(
                TunnelMessage::response(request.request_id.unwrap_or_default(), 200).with_body("{}"),
            )
        };

        let reply = handler
            .handle(TunnelMessage::request("req_1", "GET", "/"))
            .await
            .unwrap();
        assert_eq!(reply.kind, MessageType::Response);
        assert_eq!(reply.request_id.as_deref(), Some("req_1"));
    }

    #[tokio::test]
    async fn test_local_service_json() {
        let base_url = start_local_service().await;
        let handler = LocalServiceHandler::new(base_url, Duration::from_secs(5)).unwrap();

        let reply = handler
            .handle(TunnelMessage::request("req_1", "GET", "/api/v1/status"))
            .await
            .unwrap();

        assert_eq!(reply.kind, MessageType::Response);
        assert_eq!(reply.request_id.as_deref(), Some("req_1"));
        assert_eq!(reply.status_code, 200);
        assert!(!reply.body_binary);
        assert_eq!(reply.body.as_deref(), Some(r#"{"status":"ok"}"#));
    }

    #[tokio::test]
    async fn test_local_service_binary() {
        let base_url = start_local_service().await;
        let handler = LocalServiceHandler::new(base_url, Duration::from_secs(5)).unwrap();

        let request = TunnelMessage::request("req_2", "POST", "/api/v1/tts/synthesize")
            .with_header("x-voice-id", "narrator")
            .with_body("WAVE");
        let reply = handler.handle(request).await.unwrap();

        assert!(reply.body_binary);
        assert_eq!(decode_body(reply.body.as_deref().unwrap()).unwrap(), b"RIFFWAVE");
        assert_eq!(reply.headers.get("content-type").map(String::as_str), Some("audio/wav"));
        assert_eq!(reply.headers.get("x-voice-id").map(String::as_str), Some("narrator"));
        assert!(!reply.headers.contains_key("content-length"));
    }

    #[tokio::test]
    async fn test_local_service_binary_request_body() {
        let base_url = start_local_service().await;
        let handler = LocalServiceHandler::new(base_url, Duration::from_secs(5)).unwrap();

        let request = TunnelMessage::request("req_3", "POST", "/api/v1/echo")
            .with_binary_body(encode_body(&[0x00, 0xff, 0x10]));
        let reply = handler.handle(request).await.unwrap();

        assert!(reply.body_binary);
        assert_eq!(decode_body(reply.body.as_deref().unwrap()).unwrap(), vec![0x00, 0xff, 0x10]);
    }

    #[tokio::test]
    async fn test_local_service_not_found_is_a_response() {
        let base_url = start_local_service().await;
        let handler = LocalServiceHandler::new(base_url, Duration::from_secs(5)).unwrap();

        let reply = handler
            .handle(TunnelMessage::request("req_4", "GET", "/api/v1/missing"))
            .await
            .unwrap();
        assert_eq!(reply.kind, MessageType::Response);
        assert_eq!(reply.status_code, 404);
    }

    #[tokio::test]
    async fn test_local_service_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let handler = LocalServiceHandler::new(format!("http://{}", addr), Duration::from_secs(2)).unwrap();
        let err = handler
            .handle(TunnelMessage::request("req_5", "GET", "/api/v1/status"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Local service unavailable"));
    }

    #[tokio::test]
    async fn test_unsupported_method_is_rejected() {
        let handler = LocalServiceHandler::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let err = handler
            .handle(TunnelMessage::request("req_6", "BAD METHOD", "/api/v1/status"))
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<TunnelError>(),
            Some(TunnelError::HttpError(_))
        ));
        assert!(err.to_string().contains("Unsupported HTTP method: BAD METHOD"));
    }

    #[tokio::test]
    async fn test_invalid_binary_body_is_rejected() {
        let handler = LocalServiceHandler::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let request = TunnelMessage::request("req_7", "POST", "/api/v1/echo")
            .with_binary_body("not base64!!");
        let err = handler.handle(request).await.unwrap_err();

        assert!(err.to_string().contains("Failed to decode body"));
        assert!(matches!(
            err.downcast_ref::<TunnelError>(),
            Some(TunnelError::Base64Error(_))
        ));
    }

    #[test]
    fn test_is_text() {
        let reply = TunnelMessage::response("req_1", 200);
        assert!(is_text(&reply));
        assert!(is_text(&reply.clone().with_header("Content-Type", "application/json; charset=utf-8")));
        assert!(is_text(&reply.clone().with_header("content-type", "text/html")));
        assert!(!is_text(&reply.with_header("content-type", "audio/wav")));
    }
}
