#![allow(dead_code)]

use std::time::Duration;
use tokio::net::TcpListener;
use tts_tunnel_common::TunnelMessage;
use tts_tunnel_relay::{SharedSecretVerifier, TunnelServer};
use tts_tunnel_worker::{EnhancedClientConfig, RetryPolicy};

pub const SECRET: &str = "test-token-12345";

/// Start a relay tunnel server on an ephemeral port, returning it and its ws:// URL
pub async fn start_relay() -> (TunnelServer, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = TunnelServer::new(SharedSecretVerifier::new(SECRET));

    let accept = server.clone();
    tokio::spawn(async move { accept.serve(listener).await });

    (server, format!("ws://{}", addr))
}

/// A ws:// URL nothing listens on
pub async fn refused_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("ws://{}", addr)
}

/// Enhanced client config with timings shrunk for tests
pub fn fast_enhanced_config(url: &str, token: &str) -> EnhancedClientConfig {
    let mut config = EnhancedClientConfig::new(url, token);
    config.connect_timeout = Duration::from_secs(2);
    config.auth_timeout = Duration::from_secs(2);
    config.retry = RetryPolicy {
        auth_failure_delay: Duration::from_millis(30),
        failure_delay: Duration::from_millis(10),
        max_consecutive_failures: 5,
        circuit_breaker_recovery: Duration::from_secs(60),
        circuit_breaker_slice: Duration::from_millis(50),
    };
    config
}

/// Handler that answers every request with 200 and a JSON body naming its path
pub async fn echo_handler(request: TunnelMessage) -> anyhow::Result<TunnelMessage> {
    let path = request.path.unwrap_or_default();
    Ok(TunnelMessage::response("", 200)
        .with_header("Content-Type", "application/json")
        .with_body(format!(r#"{{"path":"{}"}}"#, path)))
}

/// Poll `check` until it holds, panicking after 5s
pub async fn eventually<F: FnMut() -> bool>(what: &str, mut check: F) {
    for _ in 0..250 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {}", what);
}
