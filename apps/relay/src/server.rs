//! Tunnel server: accepts worker connections and forwards requests to them
//!
//! At most one authenticated worker occupies the slot at a time. A newly
//! authenticated worker evicts the previous one under the slot lock, failing
//! its in-flight requests, before it is published for new traffic.

use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    sync::{Notify, mpsc},
    task::JoinHandle,
};
use tokio_tungstenite::{
    WebSocketStream, accept_async,
    tungstenite::{
        Message as WsMessage,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tracing::{debug, error, info, warn};
use tts_tunnel_common::{
    MessageType, Result, TunnelError, TunnelMessage,
    constants::{
        AUTH_TIMEOUT_SECS, CLOSE_CODE_AUTH_FAILED, CLOSE_CODE_EXPECTED_AUTH,
        CLOSE_CODE_REPLACED, OUTGOING_QUEUE_SIZE, REQUEST_TIMEOUT_SECS,
    },
    generate_request_id,
};

use crate::{
    auth::TokenVerifier,
    pending::{PendingGuard, PendingRequests},
};

const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Timing knobs for the tunnel server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long a new connection may take to present its AUTH frame
    pub auth_timeout: Duration,

    /// Deadline used by `send_request` callers that don't pick their own
    pub request_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_secs(AUTH_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }
}

/// The registered worker connection
struct WorkerSlot {
    id: String,
    tx: mpsc::Sender<WsMessage>,
    pending: Arc<PendingRequests>,
    shutdown: Arc<Notify>,
}

struct ServerInner {
    verifier: Arc<dyn TokenVerifier>,
    config: ServerConfig,
    slot: Mutex<Option<WorkerSlot>>,
    worker_counter: AtomicU64,
}

/// Relay-side end of the tunnel. Cheap to clone; clones share the worker slot.
#[derive(Clone)]
pub struct TunnelServer {
    inner: Arc<ServerInner>,
}

impl TunnelServer {
    pub fn new(verifier: impl TokenVerifier) -> Self {
        Self::with_config(verifier, ServerConfig::default())
    }

    pub fn with_config(verifier: impl TokenVerifier, config: ServerConfig) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                verifier: Arc::new(verifier),
                config,
                slot: Mutex::new(None),
                worker_counter: AtomicU64::new(0),
            }),
        }
    }

    /// Whether a worker is currently registered
    pub fn has_client(&self) -> bool {
        self.slot().is_some()
    }

    /// Number of registered workers, 0 or 1
    pub fn connected_clients(&self) -> usize {
        usize::from(self.has_client())
    }

    /// Requests awaiting a reply from the registered worker
    pub fn pending_count(&self) -> usize {
        self.slot().as_ref().map_or(0, |slot| slot.pending.len())
    }

    /// Accept loop: upgrades every TCP connection and runs it as a worker candidate
    pub async fn serve(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let server = self.clone();
                    tokio::spawn(async move {
                        match accept_async(stream).await {
                            Ok(ws) => {
                                debug!("WebSocket upgrade from {}", peer);
                                server.handle_connection(ws).await;
                            }
                            Err(e) => warn!("WebSocket handshake with {} failed: {}", peer, e),
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept tunnel connection: {}", e);
                }
            }
        }
    }

    /// Run one worker connection from authentication to disconnect
    pub async fn handle_connection<S>(&self, mut ws: WebSocketStream<S>)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let first = match tokio::time::timeout(
            self.inner.config.auth_timeout,
            read_first_message(&mut ws),
        )
        .await
        {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("Connection closed before authentication");
                return;
            }
            Err(_) => {
                warn!("Tunnel client timed out during auth");
                return;
            }
        };

        let secret = match TunnelMessage::decode(&first) {
            Ok(msg) if msg.kind == MessageType::Auth => msg.body.unwrap_or_default(),
            Ok(msg) => {
                warn!("Expected auth message, got {}", msg.kind);
                reject(ws, "Expected auth message", CLOSE_CODE_EXPECTED_AUTH).await;
                return;
            }
            Err(e) => {
                warn!("Invalid first message: {}", e);
                reject(ws, "Expected auth message", CLOSE_CODE_EXPECTED_AUTH).await;
                return;
            }
        };

        if !self.inner.verifier.verify(&secret) {
            warn!("Tunnel auth failed");
            reject(ws, "Invalid API key", CLOSE_CODE_AUTH_FAILED).await;
            return;
        }

        let worker_id = format!(
            "client_{}",
            self.inner.worker_counter.fetch_add(1, Ordering::Relaxed) + 1
        );
        let (write, mut read) = ws.split();
        let (tx, rx) = mpsc::channel(OUTGOING_QUEUE_SIZE);
        let shutdown = Arc::new(Notify::new());
        let writer = tokio::spawn(spawn_write_task(write, rx, shutdown.clone()));

        // AUTH_OK is queued before the slot is published, so no REQUEST can overtake it
        if let Err(e) = queue(&tx, &TunnelMessage::auth_ok()).await {
            error!("Failed to send AUTH_OK to {}: {}", worker_id, e);
            writer.abort();
            return;
        }

        let pending = Arc::new(PendingRequests::new());
        self.register(WorkerSlot {
            id: worker_id.clone(),
            tx: tx.clone(),
            pending: pending.clone(),
            shutdown: shutdown.clone(),
        });
        info!("Tunnel client connected: {}", worker_id);

        loop {
            tokio::select! {
                _ = shutdown.notified() => {
                    debug!("Connection loop for {} shut down", worker_id);
                    break;
                }
                frame = read.next() => match frame {
                    Some(Ok(WsMessage::Text(text))) => {
                        match TunnelMessage::decode(&text) {
                            Ok(msg) => {
                                if !handle_worker_message(&worker_id, &tx, &pending, msg).await {
                                    break;
                                }
                            }
                            Err(e) => warn!("Ignoring frame from {}: {}", worker_id, e),
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if tx.send(WsMessage::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!("Tunnel client {} closed connection: {:?}", worker_id, frame);
                        break;
                    }
                    Some(Ok(_)) => debug!("Ignoring non-text frame from {}", worker_id),
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", worker_id, e);
                        break;
                    }
                    None => {
                        info!("Tunnel client disconnected: {}", worker_id);
                        break;
                    }
                },
            }
        }

        if self.deregister(&worker_id) {
            info!("Removed tunnel client: {}", worker_id);
        }
        let failed = pending.fail_all("Tunnel client disconnected");
        if failed > 0 {
            warn!("Failed {} in-flight requests for {}", failed, worker_id);
        }

        let _ = tx.try_send(WsMessage::Close(None));
        drop(tx);
        if drain_writer(writer, WRITER_DRAIN_TIMEOUT).await {
            debug!("Writer for {} did not drain in time, aborted", worker_id);
        }
    }

    /// Forward a request to the worker and wait for its RESPONSE or ERROR
    pub async fn send_request(
        &self,
        method: &str,
        path: &str,
        headers: Option<HashMap<String, String>>,
        body: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<TunnelMessage> {
        let mut request = TunnelMessage::request("", method, path)
            .with_headers(headers.unwrap_or_default());
        request.body = body;
        self.forward(request, timeout).await
    }

    /// Forward a prepared REQUEST. Its `request_id` is replaced with a fresh one.
    pub async fn forward(
        &self,
        mut request: TunnelMessage,
        timeout: Option<Duration>,
    ) -> Result<TunnelMessage> {
        let timeout = timeout.unwrap_or(self.inner.config.request_timeout);
        let request_id = generate_request_id();
        request.kind = MessageType::Request;
        request.request_id = Some(request_id.clone());

        // Registering under the slot lock ties the entry to this worker's fail_all
        let (worker_id, tx, pending, rx) = {
            let slot = self.slot();
            let Some(slot) = slot.as_ref() else {
                return Err(TunnelError::ConnectionError(
                    "No tunnel client connected".to_string(),
                ));
            };
            let rx = slot.pending.register(&request_id);
            (
                slot.id.clone(),
                slot.tx.clone(),
                slot.pending.clone(),
                rx,
            )
        };
        let _guard = PendingGuard::new(&pending, &request_id);

        debug!(
            "Sending request {}: {} {}",
            request_id,
            request.method.as_deref().unwrap_or(""),
            request.path.as_deref().unwrap_or("")
        );

        let sent = queue(&tx, &request).await;
        drop(tx);
        if let Err(e) = sent {
            if self.deregister(&worker_id) {
                warn!("Removed failed tunnel client: {}", worker_id);
            }
            return Err(TunnelError::ConnectionError(format!(
                "Tunnel connection failed: {}",
                e
            )));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => {
                debug!("Received reply for request {}", request_id);
                reply
            }
            Ok(Err(_)) => Err(TunnelError::ConnectionError(
                "Tunnel client disconnected".to_string(),
            )),
            Err(_) => {
                warn!("Request {} timed out after {:?}", request_id, timeout);
                Err(TunnelError::Timeout {
                    request_id: request_id.clone(),
                    timeout_secs: timeout.as_secs_f64(),
                })
            }
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<WorkerSlot>> {
        self.inner
            .slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Publish a worker, evicting whoever held the slot
    fn register(&self, worker: WorkerSlot) {
        let mut slot = self.slot();
        if let Some(old) = slot.take() {
            warn!(
                "Kicking tunnel client {} to make room for {}",
                old.id, worker.id
            );
            old.pending.fail_all("Tunnel client replaced");
            let _ = old.tx.try_send(close_frame(
                CLOSE_CODE_REPLACED,
                "Replaced by new connection",
            ));
            old.shutdown.notify_one();
        }
        *slot = Some(worker);
    }

    /// Clear the slot if it still belongs to `worker_id`, failing its pending requests
    fn deregister(&self, worker_id: &str) -> bool {
        let mut slot = self.slot();
        match slot.as_ref() {
            Some(current) if current.id == worker_id => {
                if let Some(old) = slot.take() {
                    old.pending.fail_all("Tunnel client disconnected");
                    old.shutdown.notify_one();
                }
                true
            }
            _ => false,
        }
    }
}

/// Handle one decoded frame from a registered worker; false ends the connection
async fn handle_worker_message(
    worker_id: &str,
    tx: &mpsc::Sender<WsMessage>,
    pending: &PendingRequests,
    msg: TunnelMessage,
) -> bool {
    match msg.kind {
        MessageType::Heartbeat => {
            if let Err(e) = queue(tx, &TunnelMessage::heartbeat_ack()).await {
                warn!("Failed to ack heartbeat from {}: {}", worker_id, e);
                return false;
            }
        }
        MessageType::Response | MessageType::Error => {
            let Some(request_id) = msg.request_id.clone() else {
                warn!("Reply from {} without request_id", worker_id);
                return true;
            };
            if pending.resolve(&request_id, msg) {
                debug!("Resolved request {}", request_id);
            } else {
                warn!("No pending request for {}", request_id);
            }
        }
        other => debug!("Ignoring message type {} from {}", other, worker_id),
    }
    true
}

async fn read_first_message<S>(ws: &mut WebSocketStream<S>) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => return Some(text.as_str().to_string()),
            Ok(WsMessage::Binary(_)) => return Some(String::new()),
            Ok(WsMessage::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

/// Reply AUTH_FAIL and close with `code`
async fn reject<S>(mut ws: WebSocketStream<S>, reason: &str, code: u16)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if let Ok(json) = TunnelMessage::auth_fail(reason).encode()
        && let Err(e) = ws.send(WsMessage::Text(json.into())).await
    {
        debug!("Failed to send AUTH_FAIL: {}", e);
        return;
    }
    if let Err(e) = ws.send(close_frame(code, reason)).await {
        debug!("Failed to send close frame: {}", e);
    }
}

fn close_frame(code: u16, reason: &str) -> WsMessage {
    WsMessage::Close(Some(CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    }))
}

async fn queue(tx: &mpsc::Sender<WsMessage>, msg: &TunnelMessage) -> Result<()> {
    let json = msg.encode()?;
    tx.send(WsMessage::Text(json.into()))
        .await
        .map_err(|e| TunnelError::WebSocketError(e.to_string()))
}

/// Wait for the writer to flush its close frame; abort it past `limit`.
///
/// Returns true when the writer had to be aborted.
async fn drain_writer(mut writer: JoinHandle<()>, limit: Duration) -> bool {
    if tokio::time::timeout(limit, &mut writer).await.is_ok() {
        return false;
    }
    writer.abort();
    true
}

/// Write task: the only writer of the socket. Stops after a close frame.
async fn spawn_write_task<S>(
    mut write: SplitSink<WebSocketStream<S>, WsMessage>,
    mut outgoing_rx: mpsc::Receiver<WsMessage>,
    shutdown: Arc<Notify>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = outgoing_rx.recv().await {
        let is_close = matches!(message, WsMessage::Close(_));
        if let Err(e) = write.send(message).await {
            error!("Failed to send message: {}", e);
            shutdown.notify_one();
            break;
        }
        if is_close {
            break;
        }
    }

    debug!("Write task exiting");
}
