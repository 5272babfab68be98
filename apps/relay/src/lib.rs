//! Relay side of the TTS reverse tunnel
//!
//! The relay is publicly reachable but has no compute. Workers dial in over
//! WebSocket and authenticate with a shared secret; the relay's HTTP API then
//! forwards calls through the single active worker connection.

pub mod auth;
pub mod error_handling;
pub mod pending;
pub mod routes;
pub mod server;

pub use auth::{SharedSecretVerifier, TokenVerifier};
pub use routes::{RelayState, build_router};
pub use server::{ServerConfig, TunnelServer};
