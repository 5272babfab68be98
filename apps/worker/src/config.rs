use std::time::Duration;
use tts_tunnel_common::constants::{
    AUTH_FAILURE_RETRY_DELAY_SECS, AUTH_TIMEOUT_SECS, CIRCUIT_BREAKER_RECOVERY_SECS,
    CIRCUIT_BREAKER_SLEEP_SLICE_SECS, CONNECT_TIMEOUT_SECS, ENHANCED_HEARTBEAT_INTERVAL_SECS,
    ENHANCED_RECONNECT_BASE_DELAY_MS, FAILURE_RETRY_DELAY_SECS, HEARTBEAT_CHECK_INTERVAL_SECS,
    HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS, MAX_CONSECUTIVE_FAILURES,
    RECONNECT_MAX_DELAY_MS, RECONNECT_MIN_DELAY_MS, RECONNECT_MULTIPLIER, REQUEST_TIMEOUT_SECS,
};

/// Reconnection configuration with exponential backoff (baseline client)
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(RECONNECT_MIN_DELAY_MS),
            max_delay: Duration::from_millis(RECONNECT_MAX_DELAY_MS),
            multiplier: RECONNECT_MULTIPLIER,
        }
    }
}

impl ReconnectConfig {
    /// Delay to use after `current`, capped at `max_delay`
    pub fn next_delay(&self, current: Duration) -> Duration {
        Duration::from_millis(
            ((current.as_millis() as f64 * self.multiplier).min(self.max_delay.as_millis() as f64))
                as u64,
        )
    }
}

/// Flat retry delays and circuit breaker thresholds (enhanced client)
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the relay rejected our credentials
    pub auth_failure_delay: Duration,

    /// Delay after any other failure, independent of the failure streak
    pub failure_delay: Duration,

    /// Consecutive non-auth failures that open the circuit breaker
    pub max_consecutive_failures: u32,

    pub circuit_breaker_recovery: Duration,

    /// Longest single sleep while the breaker is open
    pub circuit_breaker_slice: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            auth_failure_delay: Duration::from_secs(AUTH_FAILURE_RETRY_DELAY_SECS),
            failure_delay: Duration::from_secs(FAILURE_RETRY_DELAY_SECS),
            max_consecutive_failures: MAX_CONSECUTIVE_FAILURES,
            circuit_breaker_recovery: Duration::from_secs(CIRCUIT_BREAKER_RECOVERY_SECS),
            circuit_breaker_slice: Duration::from_secs(CIRCUIT_BREAKER_SLEEP_SLICE_SECS),
        }
    }
}

/// Configuration for the baseline [`TunnelClient`](crate::TunnelClient)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay WebSocket URL (e.g., "ws://relay.example.com:8765")
    pub relay_url: String,

    /// Shared secret presented in the AUTH frame
    pub token: String,

    pub connect_timeout: Duration,
    pub auth_timeout: Duration,

    /// Budget for one handler invocation
    pub request_timeout: Duration,

    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectConfig,
}

impl ClientConfig {
    pub fn new(relay_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            token: token.into(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            auth_timeout: Duration::from_secs(AUTH_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration for the [`EnhancedTunnelClient`](crate::EnhancedTunnelClient)
#[derive(Debug, Clone)]
pub struct EnhancedClientConfig {
    pub relay_url: String,
    pub token: String,
    pub connect_timeout: Duration,
    pub auth_timeout: Duration,
    pub request_timeout: Duration,

    /// How often HEARTBEAT is sent while authenticated
    pub heartbeat_interval: Duration,

    /// The connection is stale after twice this without a HEARTBEAT_ACK
    pub heartbeat_timeout: Duration,

    /// How often the heartbeat monitor wakes up
    pub heartbeat_check_interval: Duration,

    /// Legacy base delay; reported in status, never grown
    pub base_reconnect_delay: Duration,

    pub retry: RetryPolicy,
}

impl EnhancedClientConfig {
    pub fn new(relay_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            relay_url: relay_url.into(),
            token: token.into(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            auth_timeout: Duration::from_secs(AUTH_TIMEOUT_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            heartbeat_interval: Duration::from_secs(ENHANCED_HEARTBEAT_INTERVAL_SECS),
            heartbeat_timeout: Duration::from_secs(HEARTBEAT_TIMEOUT_SECS),
            heartbeat_check_interval: Duration::from_secs(HEARTBEAT_CHECK_INTERVAL_SECS),
            base_reconnect_delay: Duration::from_millis(ENHANCED_RECONNECT_BASE_DELAY_MS),
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_config_defaults() {
        let reconnect = ReconnectConfig::default();
        assert_eq!(reconnect.min_delay, Duration::from_secs(1));
        assert_eq!(reconnect.max_delay, Duration::from_secs(60));
        assert_eq!(reconnect.multiplier, 2.0);
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let reconnect = ReconnectConfig::default();
        let mut delay = reconnect.min_delay;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(delay.as_secs());
            delay = reconnect.next_delay(delay);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.auth_failure_delay, Duration::from_secs(30));
        assert_eq!(policy.failure_delay, Duration::from_secs(10));
        assert_eq!(policy.max_consecutive_failures, 5);
        assert_eq!(policy.circuit_breaker_recovery, Duration::from_secs(300));
        assert_eq!(policy.circuit_breaker_slice, Duration::from_secs(30));
    }

    #[test]
    fn test_enhanced_config_defaults() {
        let config = EnhancedClientConfig::new("ws://127.0.0.1:8765", "secret");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
        assert_eq!(config.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(config.heartbeat_check_interval, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert_eq!(config.base_reconnect_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::new("ws://127.0.0.1:8765", "secret");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(config.auth_timeout, Duration::from_secs(10));
    }
}
