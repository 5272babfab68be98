use futures_util::StreamExt;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use tts_tunnel_common::{Result, TunnelMessage, constants::OUTGOING_QUEUE_SIZE};

use crate::{
    config::ClientConfig,
    connection::{
        self, WebSocket, authenticate, connect, spawn_read_task, spawn_write_task,
    },
    handler::RequestHandler,
};

/// Resolves once `stop()` has been called
pub(crate) async fn stopped(mut rx: watch::Receiver<bool>) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}

/// Baseline worker client: reconnects with capped exponential backoff
pub struct TunnelClient<H> {
    config: ClientConfig,
    handler: Arc<H>,
    connected: AtomicBool,
    connect_count: AtomicU64,
    reconnect_delay: Mutex<Duration>,
    shutdown: watch::Sender<bool>,
}

impl<H: RequestHandler> TunnelClient<H> {
    pub fn new(config: ClientConfig, handler: H) -> Self {
        let reconnect_delay = Mutex::new(config.reconnect.min_delay);
        Self {
            config,
            handler: Arc::new(handler),
            connected: AtomicBool::new(false),
            connect_count: AtomicU64::new(0),
            reconnect_delay,
            shutdown: watch::Sender::new(false),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Number of authenticated connections so far
    pub fn connect_count(&self) -> u64 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Delay the next reconnect will wait
    pub fn reconnect_delay(&self) -> Duration {
        *self
            .reconnect_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_reconnect_delay(&self, delay: Duration) {
        *self
            .reconnect_delay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = delay;
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop the client; safe to call more than once and from any task
    pub fn stop(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Stopping tunnel client");
        }
    }

    /// Main run loop with automatic reconnection; returns after `stop()`
    pub async fn start(&self) {
        info!("Starting tunnel client for {}", self.config.relay_url);

        while !self.is_stopped() {
            let result = self.connect_and_run().await;

            self.connected.store(false, Ordering::SeqCst);
            if let Err(e) = result {
                error!("Connection error: {}", e);
            }
            if self.is_stopped() {
                break;
            }

            let delay = self.reconnect_delay();
            info!("Reconnecting in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(self.shutdown.subscribe()) => break,
            }

            // Exponential backoff
            self.set_reconnect_delay(self.config.reconnect.next_delay(delay));
        }

        self.connected.store(false, Ordering::SeqCst);
        info!("Tunnel client stopped");
    }

    async fn establish_connection(&self) -> Result<WebSocket> {
        let mut ws = connect(&self.config.relay_url, self.config.connect_timeout).await?;
        authenticate(&mut ws, &self.config.token, self.config.auth_timeout).await?;
        Ok(ws)
    }

    /// Handle one connection until it drops or `stop()` is called
    async fn connect_and_run(&self) -> Result<()> {
        let ws = tokio::select! {
            ws = self.establish_connection() => ws?,
            _ = stopped(self.shutdown.subscribe()) => return Ok(()),
        };

        self.set_reconnect_delay(self.config.reconnect.min_delay);
        self.connected.store(true, Ordering::SeqCst);
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        info!("Tunnel established to {}", self.config.relay_url);

        let (write, read) = ws.split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE_SIZE);

        let mut write_handle = tokio::spawn(spawn_write_task(write, outgoing_rx));
        let mut read_handle = tokio::spawn(spawn_read_task(
            read,
            outgoing_tx.clone(),
            self.handler.clone(),
            self.config.request_timeout,
            || {},
        ));
        let mut heartbeat_handle = tokio::spawn(spawn_heartbeat_task(
            outgoing_tx.clone(),
            self.config.heartbeat_interval,
        ));

        let result = tokio::select! {
            result = &mut write_handle => flatten(result, "Write"),
            result = &mut read_handle => flatten(result, "Read"),
            result = &mut heartbeat_handle => flatten(result, "Heartbeat"),
            _ = stopped(self.shutdown.subscribe()) => {
                let _ = outgoing_tx.send(WsMessage::Close(None)).await;
                drop(outgoing_tx);
                let _ = tokio::time::timeout(Duration::from_secs(1), &mut write_handle).await;
                Ok(())
            }
        };

        read_handle.abort();
        heartbeat_handle.abort();
        write_handle.abort();
        result
    }
}

/// Unwrap a finished connection task into the connection's outcome
pub(crate) fn flatten(
    result: std::result::Result<Result<()>, tokio::task::JoinError>,
    task: &str,
) -> Result<()> {
    match result {
        Ok(result) => {
            warn!("{} task ended", task);
            result
        }
        Err(e) => Err(tts_tunnel_common::TunnelError::InternalError(format!(
            "{} task failed: {}",
            task, e
        ))),
    }
}

/// Heartbeat task sends periodic HEARTBEAT messages
async fn spawn_heartbeat_task(
    outgoing_tx: mpsc::Sender<WsMessage>,
    interval: Duration,
) -> Result<()> {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

    loop {
        ticker.tick().await;
        debug!("Sending heartbeat");
        connection::send_message(&outgoing_tx, &TunnelMessage::heartbeat()).await?;
    }
}
