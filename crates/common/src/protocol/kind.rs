use serde::{Deserialize, Serialize};
use std::fmt;

/// Kinds of messages carried over the tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Handshake: worker presents the shared secret in `body`
    Auth,
    AuthOk,
    AuthFail,

    /// Liveness check, either side may send it
    Heartbeat,
    HeartbeatAck,

    /// Data plane, correlated by `request_id`
    Request,
    Response,
    Error,
}

impl MessageType {
    /// Wire name of this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Auth => "auth",
            MessageType::AuthOk => "auth_ok",
            MessageType::AuthFail => "auth_fail",
            MessageType::Heartbeat => "heartbeat",
            MessageType::HeartbeatAck => "heartbeat_ack",
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Error => "error",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
