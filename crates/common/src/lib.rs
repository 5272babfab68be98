//! Common types for the TTS reverse tunnel
//!
//! This crate provides the wire protocol, error taxonomy, connection-health
//! models and small utilities shared by the relay (public side) and the worker
//! (private GPU side).

pub mod constants;
pub mod error;
pub mod models;
pub mod protocol;
pub mod utils;
pub mod validation;

// Re-export commonly used types for convenience
pub use error::{Result, TunnelError};
pub use models::{ConnectionHealth, ConnectionState, FailureType};
pub use protocol::{MessageType, TunnelMessage};
pub use utils::{
    current_timestamp_millis, decode_body, encode_body, generate_request_id, headers_to_map,
};
