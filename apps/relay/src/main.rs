use anyhow::{Context, Result};
use clap::Parser;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tts_tunnel_common::constants::{AUTH_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS};
use tts_tunnel_relay::{
    RelayState, ServerConfig, SharedSecretVerifier, TunnelServer, build_router,
};

/// CLI arguments for the relay
#[derive(Parser, Debug)]
#[command(name = "tts-relay")]
#[command(about = "Public relay for the TTS reverse tunnel", long_about = None)]
#[command(version)]
struct Args {
    /// Address to bind both listeners on
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Public HTTP API port
    #[arg(short, long, default_value = "9800")]
    port: u16,

    /// WebSocket port workers connect to
    #[arg(long, default_value = "8765")]
    tunnel_port: u16,

    /// Shared secret for workers and API callers
    #[arg(short, long, env = "AUTH_TOKEN")]
    token: String,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = REQUEST_TIMEOUT_SECS)]
    request_timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Configuration for the relay
#[derive(Debug, Clone)]
struct Config {
    http_addr: String,
    tunnel_addr: String,
    token: String,
    server: ServerConfig,
}

impl Config {
    fn from_args(args: Args) -> Self {
        Self {
            http_addr: format!("{}:{}", args.bind, args.port),
            tunnel_addr: format!("{}:{}", args.bind, args.tunnel_port),
            token: args.token,
            server: ServerConfig {
                auth_timeout: Duration::from_secs(AUTH_TIMEOUT_SECS),
                request_timeout: Duration::from_secs(args.request_timeout),
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    info!("TTS Tunnel Relay v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_args(args);
    if config.token.is_empty() {
        anyhow::bail!("AUTH_TOKEN must not be empty");
    }

    let tunnel = TunnelServer::with_config(
        SharedSecretVerifier::new(config.token.clone()),
        config.server.clone(),
    );
    let state = RelayState::new(
        tunnel.clone(),
        SharedSecretVerifier::new(config.token.clone()),
        config.server.request_timeout,
    );

    let tunnel_listener = TcpListener::bind(&config.tunnel_addr)
        .await
        .with_context(|| format!("Failed to bind tunnel listener on {}", config.tunnel_addr))?;
    let http_listener = TcpListener::bind(&config.http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", config.http_addr))?;

    info!("Tunnel endpoint: ws://{}", config.tunnel_addr);
    info!("HTTP API: http://{}", config.http_addr);

    let app = build_router(state);

    tokio::select! {
        _ = tunnel.serve(tunnel_listener) => {
            error!("Tunnel accept loop exited");
        }
        result = axum::serve(http_listener, app) => {
            if let Err(e) = result {
                error!("HTTP server exited: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl-C, shutting down gracefully...");
        }
    }

    Ok(())
}
