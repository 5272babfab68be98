//! Connection bookkeeping for the enhanced client
//!
//! [`ConnectionSupervisor`] owns the state machine, health counters, flat retry
//! delays, circuit breaker and heartbeat staleness check. It does no I/O and
//! takes `now` as an argument, so every decision is testable without sockets.

use serde::Serialize;
use std::time::{Duration, Instant};
use tts_tunnel_common::{ConnectionHealth, ConnectionState, FailureType, TunnelError};

use crate::config::RetryPolicy;

/// Map a connect/auth/run error to its failure kind
pub fn classify_failure(err: &TunnelError) -> FailureType {
    if err.is_credential_rejection() {
        return FailureType::AuthFailure;
    }

    match err {
        TunnelError::ConnectionRefused(_) => FailureType::ConnectionRefused,
        TunnelError::WebSocketError(_) | TunnelError::ConnectionError(_) => {
            FailureType::NetworkError
        }
        TunnelError::ConnectTimeout(_)
        | TunnelError::StaleConnection(_)
        | TunnelError::Timeout { .. } => FailureType::Timeout,
        TunnelError::Protocol(_) | TunnelError::Serialization(_) => FailureType::ProtocolError,
        _ => FailureType::Unknown,
    }
}

/// Serializable view of the health counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub total_attempts: u64,
    pub successful_connections: u64,
    pub consecutive_failures: u32,
    pub success_rate: f64,

    /// `None` until the first authenticated connection
    pub time_since_last_success_secs: Option<f64>,

    pub failure_types: std::collections::HashMap<FailureType, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CircuitBreakerStatus {
    pub active: bool,

    /// Seconds until retries resume, 0 when inactive
    pub recovery_in_secs: f64,
}

/// Snapshot returned by `EnhancedTunnelClient::get_status`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TunnelStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub connection_count: u64,
    pub reconnect_delay_secs: f64,
    pub health: HealthSnapshot,
    pub circuit_breaker: CircuitBreakerStatus,
}

#[derive(Debug, Clone)]
pub struct ConnectionSupervisor {
    policy: RetryPolicy,
    heartbeat_timeout: Duration,
    state: ConnectionState,
    health: ConnectionHealth,

    /// Legacy base delay, reported but never grown
    reconnect_delay: Duration,

    circuit_breaker_until: Option<Instant>,
    last_heartbeat_ack: Option<Instant>,
    authenticated_at: Option<Instant>,
    connect_count: u64,
}

impl ConnectionSupervisor {
    pub fn new(policy: RetryPolicy, heartbeat_timeout: Duration, base_delay: Duration) -> Self {
        Self {
            policy,
            heartbeat_timeout,
            state: ConnectionState::Disconnected,
            health: ConnectionHealth::new(),
            reconnect_delay: base_delay,
            circuit_breaker_until: None,
            last_heartbeat_ack: None,
            authenticated_at: None,
            connect_count: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn health(&self) -> &ConnectionHealth {
        &self.health
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn connect_count(&self) -> u64 {
        self.connect_count
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == ConnectionState::Authenticated
    }

    /// A new connect attempt starts
    pub fn begin_attempt(&mut self) {
        self.state = ConnectionState::Connecting;
        self.health.record_attempt();
    }

    pub fn mark_connected(&mut self) {
        self.state = ConnectionState::Connected;
    }

    pub fn mark_authenticating(&mut self) {
        self.state = ConnectionState::Authenticating;
    }

    pub fn mark_authenticated(&mut self, now: Instant) {
        self.state = ConnectionState::Authenticated;
        self.health.record_success();
        self.connect_count += 1;
        self.authenticated_at = Some(now);
        self.last_heartbeat_ack = None;
    }

    /// Leave any connected state; the circuit breaker state is kept
    pub fn mark_disconnected(&mut self) {
        if self.state != ConnectionState::CircuitBreaker {
            self.state = ConnectionState::Disconnected;
        }
        self.authenticated_at = None;
        self.last_heartbeat_ack = None;
    }

    pub fn record_heartbeat_ack(&mut self, now: Instant) {
        self.last_heartbeat_ack = Some(now);
    }

    /// How long the connection has gone without an ack, if past the stale threshold
    pub fn is_stale(&self, now: Instant) -> Option<Duration> {
        if !self.is_authenticated() {
            return None;
        }
        let since = self.last_heartbeat_ack.or(self.authenticated_at)?;
        let silent = now.saturating_duration_since(since);
        (silent > self.heartbeat_timeout * 2).then_some(silent)
    }

    /// Flat delay for a failure kind; the failure streak does not matter
    pub fn reconnect_delay_for(&self, kind: FailureType) -> Duration {
        match kind {
            FailureType::AuthFailure => self.policy.auth_failure_delay,
            _ => self.policy.failure_delay,
        }
    }

    /// Record a failed cycle and return how long to wait before the next attempt.
    ///
    /// Trips the circuit breaker on the configured streak of non-auth failures;
    /// the breaker wait is served separately by [`Self::circuit_breaker_wait`].
    pub fn handle_failure(&mut self, kind: FailureType, now: Instant) -> Duration {
        self.health.record_failure(kind);
        self.mark_disconnected();

        if kind != FailureType::AuthFailure
            && self.health.consecutive_failures >= self.policy.max_consecutive_failures
        {
            self.state = ConnectionState::CircuitBreaker;
            self.circuit_breaker_until = Some(now + self.policy.circuit_breaker_recovery);
            return Duration::ZERO;
        }

        self.reconnect_delay_for(kind)
    }

    /// Next sleep while the breaker is open, in slices of at most the policy's slice.
    ///
    /// Returns `None` once the breaker is closed, resetting the failure streak
    /// when it recovers.
    pub fn circuit_breaker_wait(&mut self, now: Instant) -> Option<Duration> {
        let until = self.circuit_breaker_until?;
        if now >= until {
            self.circuit_breaker_until = None;
            self.state = ConnectionState::Disconnected;
            self.health.consecutive_failures = 0;
            return None;
        }
        Some((until - now).min(self.policy.circuit_breaker_slice))
    }

    pub fn circuit_breaker_remaining(&self, now: Instant) -> Option<Duration> {
        self.circuit_breaker_until
            .map(|until| until.saturating_duration_since(now))
    }

    pub fn status(&self, now: Instant) -> TunnelStatus {
        let since_success = self.health.time_since_last_success();
        let remaining = self.circuit_breaker_remaining(now);

        TunnelStatus {
            state: self.state,
            connected: self.is_authenticated(),
            connection_count: self.connect_count,
            reconnect_delay_secs: self.reconnect_delay.as_secs_f64(),
            health: HealthSnapshot {
                total_attempts: self.health.total_attempts,
                successful_connections: self.health.successful_connections,
                consecutive_failures: self.health.consecutive_failures,
                success_rate: self.health.success_rate(),
                time_since_last_success_secs: (since_success != Duration::MAX)
                    .then(|| since_success.as_secs_f64()),
                failure_types: self.health.failure_types.clone(),
            },
            circuit_breaker: CircuitBreakerStatus {
                active: self.state == ConnectionState::CircuitBreaker,
                recovery_in_secs: remaining.map(|d| d.as_secs_f64()).unwrap_or(0.0),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supervisor() -> ConnectionSupervisor {
        ConnectionSupervisor::new(
            RetryPolicy::default(),
            Duration::from_secs(30),
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure(&TunnelError::auth_rejected("Invalid API key")),
            FailureType::AuthFailure
        );
        assert_eq!(
            classify_failure(&TunnelError::ConnectionRefused("Authentication timeout".into())),
            FailureType::ConnectionRefused
        );
        assert_eq!(
            classify_failure(&TunnelError::ConnectionRefused("os error 111".into())),
            FailureType::ConnectionRefused
        );
        assert_eq!(
            classify_failure(&TunnelError::ConnectionError("Connection closed by relay".into())),
            FailureType::NetworkError
        );
        assert_eq!(
            classify_failure(&TunnelError::WebSocketError("reset".into())),
            FailureType::NetworkError
        );
        assert_eq!(
            classify_failure(&TunnelError::ConnectTimeout(Duration::from_secs(10))),
            FailureType::Timeout
        );
        assert_eq!(
            classify_failure(&TunnelError::StaleConnection(Duration::from_secs(61))),
            FailureType::Timeout
        );
        assert_eq!(
            classify_failure(&TunnelError::Protocol("bad".into())),
            FailureType::ProtocolError
        );
        assert_eq!(
            classify_failure(&TunnelError::InternalError("?".into())),
            FailureType::Unknown
        );
    }

    #[test]
    fn test_non_auth_delay_is_flat() {
        let mut sup = supervisor();
        let now = Instant::now();

        for kind in [FailureType::NetworkError, FailureType::ConnectionRefused] {
            let mut sup = sup.clone();
            for streak in 0..4 {
                assert_eq!(sup.health().consecutive_failures, streak);
                let delay = sup.handle_failure(kind, now);
                assert_eq!(delay, Duration::from_secs(10));
                assert_eq!(sup.reconnect_delay(), Duration::from_millis(500));
            }
        }

        assert_eq!(sup.handle_failure(FailureType::Timeout, now), Duration::from_secs(10));
        assert_eq!(sup.reconnect_delay(), Duration::from_millis(500));
    }

    #[test]
    fn test_auth_failure_delay() {
        let mut sup = supervisor();
        let delay = sup.handle_failure(FailureType::AuthFailure, Instant::now());
        assert_eq!(delay, Duration::from_secs(30));
        assert_eq!(sup.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_circuit_breaker_trips_after_five_failures() {
        let mut sup = supervisor();
        let now = Instant::now();

        for _ in 0..4 {
            sup.handle_failure(FailureType::NetworkError, now);
            assert_eq!(sup.state(), ConnectionState::Disconnected);
        }
        let delay = sup.handle_failure(FailureType::NetworkError, now);

        assert_eq!(delay, Duration::ZERO);
        assert_eq!(sup.state(), ConnectionState::CircuitBreaker);
        assert_eq!(
            sup.circuit_breaker_remaining(now),
            Some(Duration::from_secs(300))
        );

        let status = sup.status(now);
        assert!(status.circuit_breaker.active);
        assert_eq!(status.circuit_breaker.recovery_in_secs, 300.0);
    }

    #[test]
    fn test_auth_failures_never_trip_breaker() {
        let mut sup = supervisor();
        let now = Instant::now();

        for _ in 0..10 {
            assert_eq!(
                sup.handle_failure(FailureType::AuthFailure, now),
                Duration::from_secs(30)
            );
        }
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert_eq!(sup.health().consecutive_failures, 10);
        assert_eq!(sup.circuit_breaker_wait(now), None);
    }

    #[test]
    fn test_circuit_breaker_waits_in_slices_then_recovers() {
        let mut sup = supervisor();
        let start = Instant::now();
        for _ in 0..5 {
            sup.handle_failure(FailureType::ConnectionRefused, start);
        }

        assert_eq!(sup.circuit_breaker_wait(start), Some(Duration::from_secs(30)));
        assert_eq!(
            sup.circuit_breaker_wait(start + Duration::from_secs(290)),
            Some(Duration::from_secs(10))
        );
        assert_eq!(sup.state(), ConnectionState::CircuitBreaker);

        assert_eq!(sup.circuit_breaker_wait(start + Duration::from_secs(300)), None);
        assert_eq!(sup.state(), ConnectionState::Disconnected);
        assert_eq!(sup.health().consecutive_failures, 0);
        assert_eq!(sup.circuit_breaker_remaining(start), None);
    }

    #[test]
    fn test_success_resets_streak() {
        let mut sup = supervisor();
        let now = Instant::now();

        sup.begin_attempt();
        sup.handle_failure(FailureType::NetworkError, now);
        sup.begin_attempt();
        sup.mark_connected();
        sup.mark_authenticating();
        sup.mark_authenticated(now);

        assert_eq!(sup.state(), ConnectionState::Authenticated);
        assert_eq!(sup.health().consecutive_failures, 0);
        assert_eq!(sup.health().total_attempts, 2);
        assert_eq!(sup.connect_count(), 1);

        let status = sup.status(now);
        assert!(status.connected);
        assert_eq!(status.health.success_rate, 0.5);
        assert!(status.health.time_since_last_success_secs.is_some());
        assert_eq!(status.health.failure_types[&FailureType::NetworkError], 1);
    }

    #[test]
    fn test_stale_detection() {
        let mut sup = supervisor();
        let start = Instant::now();
        assert_eq!(sup.is_stale(start + Duration::from_secs(600)), None);

        sup.begin_attempt();
        sup.mark_authenticated(start);
        assert_eq!(sup.is_stale(start + Duration::from_secs(60)), None);
        assert_eq!(
            sup.is_stale(start + Duration::from_secs(61)),
            Some(Duration::from_secs(61))
        );

        sup.record_heartbeat_ack(start + Duration::from_secs(50));
        assert_eq!(sup.is_stale(start + Duration::from_secs(100)), None);
        assert!(sup.is_stale(start + Duration::from_secs(111)).is_some());

        sup.mark_disconnected();
        assert_eq!(sup.is_stale(start + Duration::from_secs(600)), None);
    }

    #[test]
    fn test_status_before_any_attempt() {
        let sup = supervisor();
        let status = sup.status(Instant::now());

        assert_eq!(status.state, ConnectionState::Disconnected);
        assert!(!status.connected);
        assert_eq!(status.health.success_rate, 0.0);
        assert_eq!(status.health.time_since_last_success_secs, None);
        assert!(!status.circuit_breaker.active);
        assert_eq!(status.reconnect_delay_secs, 0.5);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "disconnected");
        assert!(json["health"]["time_since_last_success_secs"].is_null());
    }
}
