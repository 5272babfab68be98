use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::utils::current_timestamp_millis;

/// Classification of a failed connect/auth/run cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    AuthFailure,
    ConnectionRefused,
    NetworkError,
    Timeout,
    ProtocolError,
    Unknown,
}

impl FailureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::AuthFailure => "auth_failure",
            FailureType::ConnectionRefused => "connection_refused",
            FailureType::NetworkError => "network_error",
            FailureType::Timeout => "timeout",
            FailureType::ProtocolError => "protocol_error",
            FailureType::Unknown => "unknown",
        }
    }
}

/// Connection health counters kept by a worker client for its process lifetime
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionHealth {
    pub total_attempts: u64,
    pub successful_connections: u64,
    pub consecutive_failures: u32,

    /// Unix epoch milliseconds of the last authenticated connection
    #[serde(default)]
    pub last_success_time: Option<u64>,

    /// Unix epoch milliseconds of the last failure
    #[serde(default)]
    pub last_failure_time: Option<u64>,

    #[serde(default)]
    pub failure_types: HashMap<FailureType, u64>,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fraction of attempts that authenticated, 0.0 before any attempt
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            return 0.0;
        }
        self.successful_connections as f64 / self.total_attempts as f64
    }

    /// Time since the last success, `Duration::MAX` if there never was one
    pub fn time_since_last_success(&self) -> Duration {
        match self.last_success_time {
            Some(at) => Duration::from_millis(current_timestamp_millis().saturating_sub(at)),
            None => Duration::MAX,
        }
    }

    pub fn record_attempt(&mut self) {
        self.total_attempts += 1;
    }

    pub fn record_success(&mut self) {
        self.successful_connections += 1;
        self.consecutive_failures = 0;
        self.last_success_time = Some(current_timestamp_millis());
    }

    pub fn record_failure(&mut self, failure_type: FailureType) {
        self.consecutive_failures += 1;
        self.last_failure_time = Some(current_timestamp_millis());
        *self.failure_types.entry(failure_type).or_insert(0) += 1;
    }

    /// Number of recorded failures of the given kind
    pub fn failures_of(&self, failure_type: FailureType) -> u64 {
        self.failure_types.get(&failure_type).copied().unwrap_or(0)
    }
}
