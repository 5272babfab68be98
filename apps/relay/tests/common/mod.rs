#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Message as WsMessage, protocol::CloseFrame},
};
use tts_tunnel_common::TunnelMessage;
use tts_tunnel_relay::{ServerConfig, SharedSecretVerifier, TunnelServer};

pub const SECRET: &str = "test-token-12345";

pub type WorkerSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a tunnel server on an ephemeral port, returning it and its ws:// URL
pub async fn start_server(config: ServerConfig) -> (TunnelServer, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = TunnelServer::with_config(SharedSecretVerifier::new(SECRET), config);

    let accept = server.clone();
    tokio::spawn(async move { accept.serve(listener).await });

    (server, format!("ws://{}", addr))
}

pub async fn send(ws: &mut WorkerSocket, msg: &TunnelMessage) {
    ws.send(WsMessage::Text(msg.encode().unwrap().into()))
        .await
        .unwrap();
}

/// Next tunnel message, skipping control frames; None once the socket closes
pub async fn recv(ws: &mut WorkerSocket) -> Option<TunnelMessage> {
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => return Some(TunnelMessage::decode(&text).unwrap()),
            Ok(WsMessage::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
    None
}

/// Read frames until a close frame arrives and return it
pub async fn recv_close(ws: &mut WorkerSocket) -> Option<CloseFrame> {
    let wait = async {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(WsMessage::Close(frame)) => return frame,
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("no close frame within 5s")
}

/// Connect and authenticate a fake worker, returning the socket and the relay's answer
pub async fn connect_worker(url: &str, secret: &str) -> (WorkerSocket, TunnelMessage) {
    let (mut ws, _) = connect_async(url).await.unwrap();
    send(&mut ws, &TunnelMessage::auth(secret)).await;
    let reply = recv(&mut ws).await.expect("no auth reply");
    (ws, reply)
}

/// Wait until the server's worker slot reaches the expected state
pub async fn wait_for_client(server: &TunnelServer, connected: bool) {
    for _ in 0..100 {
        if server.has_client() == connected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("has_client never became {}", connected);
}

/// Worker that answers every REQUEST with 200 and the given JSON body
pub fn spawn_echo_worker(mut ws: WorkerSocket, body: &'static str) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = recv(&mut ws).await {
            if let Some(request_id) = msg.request_id {
                let reply = TunnelMessage::response(request_id, 200)
                    .with_header("Content-Type", "application/json")
                    .with_body(body);
                send(&mut ws, &reply).await;
            }
        }
    })
}
