//! Worker side of the TTS reverse tunnel
//!
//! The worker dials out to the relay, authenticates, and answers forwarded
//! requests with a [`RequestHandler`]. Two clients are provided: the baseline
//! [`TunnelClient`] with exponential backoff, and the [`EnhancedTunnelClient`]
//! with flat retry delays, a circuit breaker and heartbeat staleness checks.

pub mod client;
pub mod config;
pub mod connection;
pub mod enhanced;
pub mod handler;
pub mod supervisor;

pub use client::TunnelClient;
pub use config::{ClientConfig, EnhancedClientConfig, ReconnectConfig, RetryPolicy};
pub use enhanced::EnhancedTunnelClient;
pub use handler::{LocalServiceHandler, RequestHandler};
pub use supervisor::{
    CircuitBreakerStatus, ConnectionSupervisor, HealthSnapshot, TunnelStatus, classify_failure,
};
