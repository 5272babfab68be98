//! Socket plumbing shared by both worker clients
//!
//! Opening and authenticating the tunnel, the single writer task, the read
//! loop, and per-request dispatch all live here. The clients only decide what
//! to do when a connection ends.

use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::{io::ErrorKind, sync::Arc, time::Duration};
use tokio::{net::TcpStream, sync::mpsc};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message as WsMessage},
};
use tracing::{debug, error, info, warn};
use tts_tunnel_common::{MessageType, Result, TunnelError, TunnelMessage};

use crate::handler::RequestHandler;

pub type WebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open the WebSocket, bounded by `timeout`
pub async fn connect(url: &str, timeout: Duration) -> Result<WebSocket> {
    debug!("Connecting to {}", url);
    match tokio::time::timeout(timeout, connect_async(url)).await {
        Ok(Ok((ws, _))) => {
            debug!("WebSocket connection established");
            Ok(ws)
        }
        Ok(Err(e)) => Err(map_ws_error(e)),
        Err(_) => Err(TunnelError::ConnectTimeout(timeout)),
    }
}

/// Send AUTH and wait for AUTH_OK.
///
/// AUTH_FAIL and a missing answer are both refusals; anything else is a
/// protocol error.
pub async fn authenticate(ws: &mut WebSocket, token: &str, timeout: Duration) -> Result<()> {
    let auth = TunnelMessage::auth(token).encode()?;
    ws.send(WsMessage::Text(auth.into()))
        .await
        .map_err(map_ws_error)?;

    let reply = tokio::time::timeout(timeout, next_message(ws))
        .await
        .map_err(|_| TunnelError::ConnectionRefused("Authentication timeout".to_string()))??;

    match reply.kind {
        MessageType::AuthOk => {
            info!("Authentication successful");
            Ok(())
        }
        MessageType::AuthFail => {
            let reason = reply.error.as_deref().unwrap_or("Invalid API key");
            error!("Authentication failed: {}", reason);
            Err(TunnelError::auth_rejected(reason))
        }
        other => Err(TunnelError::Protocol(format!(
            "Unexpected auth response: {}",
            other
        ))),
    }
}

async fn next_message(ws: &mut WebSocket) -> Result<TunnelMessage> {
    while let Some(frame) = ws.next().await {
        match frame.map_err(map_ws_error)? {
            WsMessage::Text(text) => return TunnelMessage::decode(&text),
            WsMessage::Close(frame) => {
                return Err(TunnelError::ConnectionError(format!(
                    "Connection closed during authentication: {:?}",
                    frame
                )));
            }
            _ => continue,
        }
    }
    Err(TunnelError::ConnectionError(
        "Connection closed during authentication".to_string(),
    ))
}

/// Translate transport errors into the tunnel taxonomy
pub fn map_ws_error(e: WsError) -> TunnelError {
    match e {
        WsError::Io(io) if io.kind() == ErrorKind::ConnectionRefused => {
            TunnelError::ConnectionRefused(io.to_string())
        }
        WsError::Io(io) if io.kind() == ErrorKind::TimedOut => {
            TunnelError::ConnectTimeout(Duration::ZERO)
        }
        WsError::Url(e) => TunnelError::InternalError(format!("Invalid relay URL: {}", e)),
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TunnelError::ConnectionError("Connection closed".to_string())
        }
        other => TunnelError::WebSocketError(other.to_string()),
    }
}

/// Queue a message for the writer task
pub async fn send_message(tx: &mpsc::Sender<WsMessage>, msg: &TunnelMessage) -> Result<()> {
    let json = msg.encode()?;
    tx.send(WsMessage::Text(json.into()))
        .await
        .map_err(|_| TunnelError::WebSocketError("Write task has stopped".to_string()))
}

/// Write task sends outgoing messages through WebSocket; it ends after a close frame
pub async fn spawn_write_task(
    mut write: SplitSink<WebSocket, WsMessage>,
    mut outgoing_rx: mpsc::Receiver<WsMessage>,
) -> Result<()> {
    while let Some(message) = outgoing_rx.recv().await {
        let is_close = matches!(message, WsMessage::Close(_));
        if let Err(e) = write.send(message).await {
            error!("Failed to send message: {}", e);
            return Err(map_ws_error(e));
        }
        if is_close {
            break;
        }
    }

    debug!("Write task exiting");
    Ok(())
}

/// Read task: answers relay heartbeats, reports acks, dispatches requests.
///
/// Only returns on close or transport error, always as an error so the
/// caller reconnects.
pub async fn spawn_read_task<H, F>(
    mut read: SplitStream<WebSocket>,
    outgoing_tx: mpsc::Sender<WsMessage>,
    handler: Arc<H>,
    request_timeout: Duration,
    mut on_heartbeat_ack: F,
) -> Result<()>
where
    H: RequestHandler,
    F: FnMut() + Send,
{
    while let Some(frame) = read.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => match TunnelMessage::decode(&text) {
                Ok(msg) => match msg.kind {
                    MessageType::Heartbeat => {
                        send_message(&outgoing_tx, &TunnelMessage::heartbeat_ack()).await?;
                    }
                    MessageType::HeartbeatAck => {
                        debug!("Received heartbeat ack");
                        on_heartbeat_ack();
                    }
                    MessageType::Request => {
                        dispatch_request(
                            handler.clone(),
                            msg,
                            request_timeout,
                            outgoing_tx.clone(),
                        );
                    }
                    other => warn!("Unexpected message type: {}", other),
                },
                Err(e) => error!("Error handling message: {}", e),
            },
            Ok(WsMessage::Ping(data)) => {
                debug!("Received WebSocket ping");
                if outgoing_tx.send(WsMessage::Pong(data)).await.is_err() {
                    break;
                }
            }
            Ok(WsMessage::Close(frame)) => {
                info!("Relay closed connection: {:?}", frame);
                return Err(TunnelError::ConnectionError(
                    "Connection closed by relay".to_string(),
                ));
            }
            Ok(_) => {}
            Err(e) => {
                error!("WebSocket error: {}", e);
                return Err(map_ws_error(e));
            }
        }
    }

    debug!("Read task exiting");
    Err(TunnelError::ConnectionError(
        "Connection closed by relay".to_string(),
    ))
}

/// Run the handler for one REQUEST on its own task.
///
/// Exactly one RESPONSE or ERROR carrying the request's id is queued, whether
/// the handler succeeds, fails, panics, or runs past `timeout`.
pub fn dispatch_request<H: RequestHandler>(
    handler: Arc<H>,
    request: TunnelMessage,
    timeout: Duration,
    outgoing_tx: mpsc::Sender<WsMessage>,
) {
    tokio::spawn(async move {
        let request_id = request.request_id.clone().unwrap_or_default();
        debug!(
            "Handling request {}: {} {}",
            request_id,
            request.method.as_deref().unwrap_or(""),
            request.path.as_deref().unwrap_or("")
        );

        let reply = run_handler(handler, request, timeout).await;
        let reply = finalize_reply(reply, &request_id);

        if let Err(e) = send_message(&outgoing_tx, &reply).await {
            warn!("Failed to send reply for {}: {}", request_id, e);
        }
    });
}

async fn run_handler<H: RequestHandler>(
    handler: Arc<H>,
    request: TunnelMessage,
    timeout: Duration,
) -> std::result::Result<TunnelMessage, (String, u16)> {
    let request_id = request.request_id.clone().unwrap_or_default();
    let mut task = tokio::spawn(async move { handler.handle(request).await });

    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(reply))) => Ok(reply),
        Ok(Ok(Err(e))) => {
            error!("Error handling request {}: {:#}", request_id, e);
            Err((e.to_string(), 500))
        }
        Ok(Err(join_err)) => {
            error!("Handler for request {} panicked: {}", request_id, join_err);
            Err(("Request handler panicked".to_string(), 500))
        }
        Err(_) => {
            task.abort();
            warn!("Request {} timed out after {:?}", request_id, timeout);
            Err(("Request timed out".to_string(), 504))
        }
    }
}

/// Stamp the request id on the handler's answer, or turn a failure into ERROR
fn finalize_reply(
    reply: std::result::Result<TunnelMessage, (String, u16)>,
    request_id: &str,
) -> TunnelMessage {
    match reply {
        Ok(mut reply) if reply.is_reply() => {
            reply.request_id = Some(request_id.to_string());
            reply
        }
        Ok(other) => TunnelMessage::error(
            request_id,
            format!("Handler returned {} instead of a reply", other.kind),
            500,
        ),
        Err((error, status)) => TunnelMessage::error(request_id, error, status),
    }
}
