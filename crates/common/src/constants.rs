/// Time allowed for the first AUTH exchange on a fresh tunnel connection (10 seconds)
pub const AUTH_TIMEOUT_SECS: u64 = 10;

/// Time allowed for the TCP + WebSocket opening handshake (10 seconds)
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default time a forwarded request may take end to end (5 minutes, TTS can be slow)
pub const REQUEST_TIMEOUT_SECS: u64 = 300;

/// Heartbeat interval used by the baseline worker client (30 seconds)
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Initial delay for the baseline client's exponential backoff (1 second)
pub const RECONNECT_MIN_DELAY_MS: u64 = 1000;

/// Maximum delay for the baseline client's exponential backoff (60 seconds)
pub const RECONNECT_MAX_DELAY_MS: u64 = 60_000;

/// Multiplier for the baseline client's exponential backoff
pub const RECONNECT_MULTIPLIER: f64 = 2.0;

/// Heartbeat interval used by the enhanced worker client (15 seconds)
pub const ENHANCED_HEARTBEAT_INTERVAL_SECS: u64 = 15;

/// Heartbeat timeout; a connection is stale after twice this without an ack (30 seconds)
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// How often the enhanced client checks heartbeat bookkeeping (5 seconds)
pub const HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 5;

/// Legacy base reconnect delay kept by the enhanced client (500 ms)
pub const ENHANCED_RECONNECT_BASE_DELAY_MS: u64 = 500;

/// Flat reconnect delay after an authentication failure (30 seconds)
pub const AUTH_FAILURE_RETRY_DELAY_SECS: u64 = 30;

/// Flat reconnect delay after any other failure (10 seconds)
pub const FAILURE_RETRY_DELAY_SECS: u64 = 10;

/// Consecutive non-auth failures before the circuit breaker opens
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// How long the circuit breaker stays open (5 minutes)
pub const CIRCUIT_BREAKER_RECOVERY_SECS: u64 = 300;

/// Longest single sleep while the circuit breaker is open (30 seconds)
pub const CIRCUIT_BREAKER_SLEEP_SLICE_SECS: u64 = 30;

/// Capacity of the per-connection outgoing message queue
pub const OUTGOING_QUEUE_SIZE: usize = 128;

/// Close code sent to a worker evicted by a newer authenticated connection
pub const CLOSE_CODE_REPLACED: u16 = 4001;

/// Close code sent when the first message on a connection is not AUTH
pub const CLOSE_CODE_EXPECTED_AUTH: u16 = 4002;

/// Close code sent when the shared secret is rejected
pub const CLOSE_CODE_AUTH_FAILED: u16 = 4003;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_values() {
        const _: () = assert!(HEARTBEAT_INTERVAL_SECS < REQUEST_TIMEOUT_SECS);
        const _: () = assert!(ENHANCED_HEARTBEAT_INTERVAL_SECS < HEARTBEAT_TIMEOUT_SECS);
        const _: () = assert!(HEARTBEAT_CHECK_INTERVAL_SECS < ENHANCED_HEARTBEAT_INTERVAL_SECS);
        const _: () = assert!(RECONNECT_MIN_DELAY_MS < RECONNECT_MAX_DELAY_MS);
        const _: () = assert!(FAILURE_RETRY_DELAY_SECS < AUTH_FAILURE_RETRY_DELAY_SECS);
        const _: () = assert!(CIRCUIT_BREAKER_SLEEP_SLICE_SECS < CIRCUIT_BREAKER_RECOVERY_SECS);
        const _: () = assert!(RECONNECT_MULTIPLIER > 1.0);

        assert_ne!(CLOSE_CODE_REPLACED, CLOSE_CODE_AUTH_FAILED);
        assert_ne!(CLOSE_CODE_EXPECTED_AUTH, CLOSE_CODE_AUTH_FAILED);
    }
}
