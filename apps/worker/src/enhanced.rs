//! Hardened worker client
//!
//! Same tunnel as [`TunnelClient`](crate::TunnelClient), with classified
//! failures, flat retry delays, a circuit breaker and heartbeat staleness
//! detection. All bookkeeping lives in [`ConnectionSupervisor`].

use futures_util::StreamExt;
use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use tts_tunnel_common::{
    ConnectionHealth, ConnectionState, Result, TunnelError, TunnelMessage,
    constants::OUTGOING_QUEUE_SIZE,
};

use crate::{
    client::{flatten, stopped},
    config::EnhancedClientConfig,
    connection::{self, WebSocket, authenticate, connect, spawn_read_task, spawn_write_task},
    handler::RequestHandler,
    supervisor::{ConnectionSupervisor, TunnelStatus, classify_failure},
};

type SharedSupervisor = Arc<Mutex<ConnectionSupervisor>>;

fn lock(supervisor: &Mutex<ConnectionSupervisor>) -> MutexGuard<'_, ConnectionSupervisor> {
    supervisor
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct EnhancedTunnelClient<H> {
    config: EnhancedClientConfig,
    handler: Arc<H>,
    supervisor: SharedSupervisor,

    /// Writer queue of the live connection
    outgoing: Mutex<Option<mpsc::Sender<WsMessage>>>,

    shutdown: watch::Sender<bool>,
}

impl<H: RequestHandler> EnhancedTunnelClient<H> {
    pub fn new(config: EnhancedClientConfig, handler: H) -> Self {
        let supervisor = ConnectionSupervisor::new(
            config.retry.clone(),
            config.heartbeat_timeout,
            config.base_reconnect_delay,
        );
        Self {
            config,
            handler: Arc::new(handler),
            supervisor: Arc::new(Mutex::new(supervisor)),
            outgoing: Mutex::new(None),
            shutdown: watch::Sender::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.supervisor).state()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.supervisor).is_authenticated()
    }

    pub fn health(&self) -> ConnectionHealth {
        lock(&self.supervisor).health().clone()
    }

    /// Number of authenticated connections so far
    pub fn connection_count(&self) -> u64 {
        lock(&self.supervisor).connect_count()
    }

    pub fn reconnect_delay(&self) -> Duration {
        lock(&self.supervisor).reconnect_delay()
    }

    pub fn get_status(&self) -> TunnelStatus {
        lock(&self.supervisor).status(Instant::now())
    }

    /// Queue a message on the live connection
    pub async fn send_message(&self, msg: &TunnelMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(TunnelError::NotConnected);
        }
        let tx = self
            .outgoing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(TunnelError::NotConnected)?;
        connection::send_message(&tx, msg).await
    }

    fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Stop the client; safe to call more than once and from any task
    pub fn stop(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Stopping enhanced tunnel client");
        }
    }

    /// Sleep unless stopped first; returns false when stopped
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => !self.is_stopped(),
            _ = stopped(self.shutdown.subscribe()) => false,
        }
    }

    /// Main run loop; failures never escape, it returns only after `stop()`
    pub async fn start(&self) {
        info!("Starting enhanced tunnel client for {}", self.config.relay_url);

        'run: while !self.is_stopped() {
            loop {
                let wait = lock(&self.supervisor).circuit_breaker_wait(Instant::now());
                let Some(wait) = wait else { break };
                info!("Circuit breaker open, retrying in {:?}", wait);
                if !self.pause(wait).await {
                    break 'run;
                }
            }

            lock(&self.supervisor).begin_attempt();
            let result = self.connect_and_run().await;
            self.set_outgoing(None);

            match result {
                Ok(()) => {
                    lock(&self.supervisor).mark_disconnected();
                }
                Err(e) => {
                    let kind = classify_failure(&e);
                    let delay = lock(&self.supervisor).handle_failure(kind, Instant::now());
                    error!("Connection failed ({}): {}", kind.as_str(), e);

                    if self.state() == ConnectionState::CircuitBreaker {
                        warn!(
                            "Circuit breaker opened after {} consecutive failures",
                            self.config.retry.max_consecutive_failures
                        );
                    } else {
                        info!("Reconnecting in {:?}", delay);
                        if !self.pause(delay).await {
                            break;
                        }
                    }
                }
            }
        }

        lock(&self.supervisor).mark_disconnected();
        info!("Enhanced tunnel client stopped");
    }

    fn set_outgoing(&self, tx: Option<mpsc::Sender<WsMessage>>) {
        *self
            .outgoing
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = tx;
    }

    async fn establish_connection(&self) -> Result<WebSocket> {
        let mut ws = connect(&self.config.relay_url, self.config.connect_timeout).await?;
        lock(&self.supervisor).mark_connected();

        lock(&self.supervisor).mark_authenticating();
        authenticate(&mut ws, &self.config.token, self.config.auth_timeout).await?;
        lock(&self.supervisor).mark_authenticated(Instant::now());

        Ok(ws)
    }

    /// Handle one connection until it fails or `stop()` is called
    async fn connect_and_run(&self) -> Result<()> {
        let ws = tokio::select! {
            ws = self.establish_connection() => ws?,
            _ = stopped(self.shutdown.subscribe()) => return Ok(()),
        };
        info!("Tunnel established to {}", self.config.relay_url);

        let (write, read) = ws.split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE_SIZE);
        self.set_outgoing(Some(outgoing_tx.clone()));

        let acks = self.supervisor.clone();
        let mut write_handle = tokio::spawn(spawn_write_task(write, outgoing_rx));
        let mut read_handle = tokio::spawn(spawn_read_task(
            read,
            outgoing_tx.clone(),
            self.handler.clone(),
            self.config.request_timeout,
            move || lock(&acks).record_heartbeat_ack(Instant::now()),
        ));
        let mut heartbeat_handle = tokio::spawn(spawn_heartbeat_monitor(
            self.supervisor.clone(),
            outgoing_tx.clone(),
            self.config.heartbeat_interval,
            self.config.heartbeat_check_interval,
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

/// Sends HEARTBEAT every `interval` and fails the connection once it goes stale.
///
/// Beats and staleness checks run on separate tickers. The first beat goes
/// out immediately.
async fn spawn_heartbeat_monitor(
    supervisor: SharedSupervisor,
    outgoing_tx: mpsc::Sender<WsMessage>,
    interval: Duration,
    check_interval: Duration,
) -> Result<()> {
    let mut beat = tokio::time::interval(interval);
    let mut check = tokio::time::interval(check_interval);

    loop {
        tokio::select! {
            _ = beat.tick() => {
                debug!("Sending heartbeat");
                connection::send_message(&outgoing_tx, &TunnelMessage::heartbeat()).await?;
            }
            _ = check.tick() => {
                let stale = lock(&supervisor).is_stale(Instant::now());
                if let Some(silent) = stale {
                    warn!("No heartbeat ack for {:?}, forcing reconnect", silent);
                    return Err(TunnelError::StaleConnection(silent));
                }
            }
        }
    }
}
