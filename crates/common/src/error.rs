use std::time::Duration;
use thiserror::Error;

/// Error types for the TTS reverse tunnel
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The peer refused the connection or the credentials.
    /// Refusals whose message starts with "Authentication failed" are credential rejections.
    #[error("{0}")]
    ConnectionRefused(String),

    #[error("{0}")]
    ConnectionError(String),

    #[error("Request {request_id} timed out after {timeout_secs}s")]
    Timeout {
        request_id: String,
        timeout_secs: f64,
    },

    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Stale connection: no heartbeat ack for {0:?}")]
    StaleConnection(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Tunnel not connected")]
    NotConnected,

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64Error(#[from] base64::DecodeError),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TunnelError {
    /// Build the error raised when an AUTH exchange is rejected by the relay
    pub fn auth_rejected(reason: &str) -> Self {
        TunnelError::ConnectionRefused(format!("Authentication failed: {}", reason))
    }

    /// Whether this is a refusal caused by rejected credentials
    pub fn is_credential_rejection(&self) -> bool {
        matches!(self, TunnelError::Authentication(_))
            || matches!(self, TunnelError::ConnectionRefused(msg) if msg.contains("Authentication failed"))
    }
}

/// Type alias for Results using TunnelError
pub type Result<T> = std::result::Result<T, TunnelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TunnelError::Protocol("unknown type".to_string());
        assert_eq!(err.to_string(), "Protocol error: unknown type");

        let err = TunnelError::ConnectionError("No tunnel client connected".to_string());
        assert_eq!(err.to_string(), "No tunnel client connected");

        let err = TunnelError::Timeout {
            request_id: "req_1".to_string(),
            timeout_secs: 2.5,
        };
        assert_eq!(err.to_string(), "Request req_1 timed out after 2.5s");
    }

    #[test]
    fn test_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json");
        assert!(json_err.is_err());

        let tunnel_err: TunnelError = json_err.unwrap_err().into();
        assert!(matches!(tunnel_err, TunnelError::Serialization(_)));
    }

    #[test]
    fn test_credential_rejection_detection() {
        assert!(TunnelError::auth_rejected("Invalid API key").is_credential_rejection());
        assert!(TunnelError::Authentication("bad".to_string()).is_credential_rejection());

        assert!(
            !TunnelError::ConnectionRefused("Authentication timeout".to_string())
                .is_credential_rejection()
        );
        assert!(
            !TunnelError::ConnectionRefused("Connection refused (os error 111)".to_string())
                .is_credential_rejection()
        );
        assert!(!TunnelError::NotConnected.is_credential_rejection());
    }
}
