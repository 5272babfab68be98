use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::MessageType;
use crate::{
    error::{Result, TunnelError},
    utils::decode_body,
};

/// Status code assumed when the wire omits `status_code`
pub const DEFAULT_STATUS_CODE: u16 = 200;

fn default_status_code() -> u16 {
    DEFAULT_STATUS_CODE
}

fn is_default_status_code(code: &u16) -> bool {
    *code == DEFAULT_STATUS_CODE
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

/// A single frame on the tunnel.
///
/// Every field except `type` is omitted from the wire when it holds its
/// default value, and absent fields decode back to those defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,

    /// Echoed verbatim on the RESPONSE or ERROR answering a REQUEST
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// JSON text, or Base64 when `body_binary` is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub body_binary: bool,

    #[serde(
        default = "default_status_code",
        skip_serializing_if = "is_default_status_code"
    )]
    pub status_code: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TunnelMessage {
    /// Create a message of the given kind with every other field at its default
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind,
            request_id: None,
            method: None,
            path: None,
            headers: HashMap::new(),
            body: None,
            body_binary: false,
            status_code: DEFAULT_STATUS_CODE,
            error: None,
        }
    }

    /// AUTH carrying the shared secret
    pub fn auth(secret: impl Into<String>) -> Self {
        Self::new(MessageType::Auth).with_body(secret)
    }

    pub fn auth_ok() -> Self {
        Self::new(MessageType::AuthOk)
    }

    pub fn auth_fail(reason: impl Into<String>) -> Self {
        let mut msg = Self::new(MessageType::AuthFail);
        msg.error = Some(reason.into());
        msg
    }

    pub fn heartbeat() -> Self {
        Self::new(MessageType::Heartbeat)
    }

    pub fn heartbeat_ack() -> Self {
        Self::new(MessageType::HeartbeatAck)
    }

    /// REQUEST forwarded from the relay to the worker
    pub fn request(
        request_id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(MessageType::Request);
        msg.request_id = Some(request_id.into());
        msg.method = Some(method.into());
        msg.path = Some(path.into());
        msg
    }

    /// RESPONSE answering the REQUEST with the same id
    pub fn response(request_id: impl Into<String>, status_code: u16) -> Self {
        let mut msg = Self::new(MessageType::Response);
        msg.request_id = Some(request_id.into());
        msg.status_code = status_code;
        msg
    }

    /// ERROR answering the REQUEST with the same id
    pub fn error(request_id: impl Into<String>, error: impl Into<String>, status_code: u16) -> Self {
        let mut msg = Self::new(MessageType::Error);
        msg.request_id = Some(request_id.into());
        msg.error = Some(error.into());
        msg.status_code = status_code;
        msg
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Attach a Base64 body and flag it as binary
    pub fn with_binary_body(mut self, encoded: impl Into<String>) -> Self {
        self.body = Some(encoded.into());
        self.body_binary = true;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// RESPONSE or ERROR, i.e. something that resolves a pending request
    pub fn is_reply(&self) -> bool {
        matches!(self.kind, MessageType::Response | MessageType::Error)
    }

    /// A RESPONSE with a 2xx status code
    pub fn is_success(&self) -> bool {
        self.kind == MessageType::Response && (200..300).contains(&self.status_code)
    }

    /// Body as raw bytes, Base64-decoded when flagged binary
    pub fn body_bytes(&self) -> Result<Vec<u8>> {
        match &self.body {
            None => Ok(Vec::new()),
            Some(body) if self.body_binary => Ok(decode_body(body)?),
            Some(body) => Ok(body.as_bytes().to_vec()),
        }
    }

    /// Serialize to the JSON text frame format
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a JSON text frame, rejecting invalid JSON and unknown types
    pub fn decode(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| TunnelError::Protocol(format!("Failed to parse message: {}", e)))
    }
}
