use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::{sync::Arc, time::Duration};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tts_tunnel_common::constants::REQUEST_TIMEOUT_SECS;
use tts_tunnel_worker::{
    ClientConfig, EnhancedClientConfig, EnhancedTunnelClient, LocalServiceHandler, TunnelClient,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Exponential backoff, no circuit breaker
    Baseline,
    /// Flat retry delays, circuit breaker, heartbeat staleness checks
    Enhanced,
}

/// CLI arguments for the worker
#[derive(Parser, Debug)]
#[command(name = "tts-worker")]
#[command(about = "Worker agent for the TTS reverse tunnel", long_about = None)]
#[command(version)]
struct Args {
    /// Relay tunnel endpoint
    #[arg(short, long, env = "TTS_RELAY_URL", default_value = "ws://127.0.0.1:8765")]
    relay_url: String,

    /// Shared secret presented to the relay
    #[arg(short, long, env = "AUTH_TOKEN")]
    token: String,

    /// Local TTS service that answers forwarded requests
    #[arg(short, long, default_value = "http://127.0.0.1:8766")]
    local_url: String,

    /// Which client to run
    #[arg(long, value_enum, default_value_t = Mode::Enhanced)]
    mode: Mode,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = REQUEST_TIMEOUT_SECS)]
    request_timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
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

    info!("TTS Tunnel Worker v{}", env!("CARGO_PKG_VERSION"));
    if args.token.is_empty() {
        anyhow::bail!("AUTH_TOKEN must not be empty");
    }

    let request_timeout = Duration::from_secs(args.request_timeout);
    let handler = LocalServiceHandler::new(&args.local_url, request_timeout)?;
    info!("Forwarding to local service at {}", handler.base_url());

    match args.mode {
        Mode::Baseline => {
            let mut config = ClientConfig::new(args.relay_url, args.token);
            config.request_timeout = request_timeout;
            let client = Arc::new(TunnelClient::new(config, handler));
            spawn_ctrl_c(client.clone(), |client| client.stop());
            client.start().await;
        }
        Mode::Enhanced => {
            let mut config = EnhancedClientConfig::new(args.relay_url, args.token);
            config.request_timeout = request_timeout;
            let client = Arc::new(EnhancedTunnelClient::new(config, handler));
            spawn_ctrl_c(client.clone(), |client| client.stop());
            client.start().await;
        }
    }

    Ok(())
}

fn spawn_ctrl_c<C, F>(client: Arc<C>, stop: F)
where
    C: Send + Sync + 'static,
    F: FnOnce(&C) + Send + 'static,
{
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down gracefully...");
            stop(&client);
        }
    });
}
