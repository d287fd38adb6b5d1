//! Connection Domain Types
//!
//! Parameters and lifecycle state for a streaming connection.
//!
//! # Parameter Invariants
//!
//! - The stream host must be set.
//! - With heartbeating enabled the heartbeat interval must be at least
//!   [`MIN_HEARTBEAT_INTERVAL`], otherwise the server gets flooded.
//! - With heartbeating enabled and a finite connection timeout, the timeout
//!   must exceed the heartbeat interval by [`HEARTBEAT_LATENCY_MARGIN`].
//!   The receive loop uses the timeout as its idle-read deadline, and a quiet
//!   but healthy server only speaks when pinged.
//! - A finite connection timeout must be at least [`MIN_CONNECTION_TIMEOUT`].

use std::fmt;
use std::time::Duration;

/// Smallest heartbeat interval accepted when heartbeating is enabled.
pub const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

/// Smallest finite connection timeout accepted.
pub const MIN_CONNECTION_TIMEOUT: Duration = Duration::from_millis(100);

/// Shortest pause between consecutive connect attempts.
pub const MIN_RECONNECTION_DELAY: Duration = Duration::from_millis(200);

/// Expected round-trip latency added on top of the heartbeat interval when
/// checking it against the connection timeout.
pub const HEARTBEAT_LATENCY_MARGIN: Duration = Duration::from_millis(100);

// =============================================================================
// Connection State
// =============================================================================

/// Lifecycle state of a streaming connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    /// Not connected. Initial and terminal state.
    #[default]
    Disconnected,
    /// Connection attempts in progress.
    Connecting,
    /// Transport open, receive loop running.
    Connected,
    /// Graceful close in progress.
    Disconnecting,
}

impl ConnectionState {
    /// Get the state name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }

    /// Whether a connect request should be ignored in this state.
    #[must_use]
    pub const fn is_connecting_or_connected(&self) -> bool {
        matches!(self, Self::Connecting | Self::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Reconnection Attempts
// =============================================================================

/// How many times a failed connect is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectionAttempts {
    /// Retry up to `n` times after the initial attempt (`n + 1` attempts total).
    Limited(u32),
    /// Retry until success or cancellation.
    Infinite,
}

impl ReconnectionAttempts {
    /// Total number of connect attempts, `None` when unbounded.
    #[must_use]
    pub const fn total_attempts(&self) -> Option<u64> {
        match self {
            Self::Limited(n) => Some(*n as u64 + 1),
            Self::Infinite => None,
        }
    }

    /// Whether the attempt with the given zero-based index is allowed.
    #[must_use]
    pub const fn allows(&self, attempt: u64) -> bool {
        match self.total_attempts() {
            Some(total) => attempt < total,
            None => true,
        }
    }

    /// Parse from a signed count where any negative value means unbounded.
    #[must_use]
    pub fn from_signed(count: i64) -> Self {
        u32::try_from(count).map_or(Self::Infinite, Self::Limited)
    }
}

impl Default for ReconnectionAttempts {
    fn default() -> Self {
        Self::Limited(0)
    }
}

// =============================================================================
// Connection Parameters
// =============================================================================

/// Parameters for establishing and keeping a streaming connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParameters {
    /// Stream URL, e.g. `wss://stream.bybit.com/v5/public/spot`.
    pub stream_host: Option<String>,
    /// Retry budget for failed connects.
    pub reconnection_attempts: ReconnectionAttempts,
    /// Pause between consecutive connect attempts.
    pub reconnection_interval: Duration,
    /// Per-operation timeout; `None` waits forever.
    pub connection_timeout: Option<Duration>,
    /// Whether keep-alive pings are sent while connected.
    pub use_heartbeating: bool,
    /// Interval between keep-alive pings.
    pub heartbeat_interval: Duration,
}

impl Default for ConnectionParameters {
    fn default() -> Self {
        Self {
            stream_host: None,
            reconnection_attempts: ReconnectionAttempts::default(),
            reconnection_interval: Duration::ZERO,
            connection_timeout: Some(Duration::from_secs(30)),
            use_heartbeating: false,
            heartbeat_interval: Duration::from_secs(20),
        }
    }
}

impl ConnectionParameters {
    /// Create parameters for the given stream host with default policy.
    #[must_use]
    pub fn new(stream_host: impl Into<String>) -> Self {
        Self {
            stream_host: Some(stream_host.into()),
            ..Self::default()
        }
    }

    /// Set the reconnection policy.
    #[must_use]
    pub const fn with_reconnection(
        mut self,
        attempts: ReconnectionAttempts,
        interval: Duration,
    ) -> Self {
        self.reconnection_attempts = attempts;
        self.reconnection_interval = interval;
        self
    }

    /// Set the connection timeout (`None` for infinite).
    #[must_use]
    pub const fn with_connection_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Enable heartbeating with the given interval.
    #[must_use]
    pub const fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.use_heartbeating = true;
        self.heartbeat_interval = interval;
        self
    }

    /// Disable heartbeating.
    #[must_use]
    pub const fn without_heartbeat(mut self) -> Self {
        self.use_heartbeating = false;
        self
    }

    /// Pause before a retry: the reconnection interval, floored at
    /// [`MIN_RECONNECTION_DELAY`].
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        self.reconnection_interval.max(MIN_RECONNECTION_DELAY)
    }

    /// The stream host, or an empty string when unset.
    #[must_use]
    pub fn host(&self) -> &str {
        self.stream_host.as_deref().unwrap_or_default()
    }

    /// Check the parameter invariants.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.stream_host.as_deref().is_none_or(|h| h.trim().is_empty()) {
            return Err(ConfigurationError::MissingStreamHost);
        }

        if self.use_heartbeating && self.heartbeat_interval < MIN_HEARTBEAT_INTERVAL {
            return Err(ConfigurationError::HeartbeatIntervalTooSmall {
                interval: self.heartbeat_interval,
                minimum: MIN_HEARTBEAT_INTERVAL,
            });
        }

        if let Some(timeout) = self.connection_timeout {
            let outruns_heartbeat = self
                .heartbeat_interval
                .checked_add(HEARTBEAT_LATENCY_MARGIN)
                .is_none_or(|required| timeout < required);
            if self.use_heartbeating && outruns_heartbeat {
                return Err(ConfigurationError::TimeoutShorterThanHeartbeat {
                    timeout,
                    heartbeat_interval: self.heartbeat_interval,
                });
            }

            if timeout < MIN_CONNECTION_TIMEOUT {
                return Err(ConfigurationError::TimeoutTooSmall {
                    timeout,
                    minimum: MIN_CONNECTION_TIMEOUT,
                });
            }
        }

        Ok(())
    }
}

/// Invalid connection parameters, detected before any I/O.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Stream host is missing or blank.
    #[error("stream host is not set")]
    MissingStreamHost,

    /// Heartbeat interval below the flooding floor.
    #[error("heartbeat interval {interval:?} is below the minimum of {minimum:?}")]
    HeartbeatIntervalTooSmall {
        /// Configured interval.
        interval: Duration,
        /// Smallest accepted interval.
        minimum: Duration,
    },

    /// Idle-read timeout would fire before the next heartbeat reply.
    #[error(
        "connection timeout {timeout:?} must exceed the heartbeat interval {heartbeat_interval:?} plus expected latency"
    )]
    TimeoutShorterThanHeartbeat {
        /// Configured connection timeout.
        timeout: Duration,
        /// Configured heartbeat interval.
        heartbeat_interval: Duration,
    },

    /// Finite connection timeout below the floor.
    #[error("connection timeout {timeout:?} is below the minimum of {minimum:?}")]
    TimeoutTooSmall {
        /// Configured connection timeout.
        timeout: Duration,
        /// Smallest accepted timeout.
        minimum: Duration,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn valid() -> ConnectionParameters {
        ConnectionParameters::new("wss://stream.example/v5/public/spot")
            .with_connection_timeout(Some(Duration::from_secs(10)))
            .with_heartbeat(Duration::from_secs(5))
    }

    #[test]
    fn default_state_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn valid_parameters_pass() {
        assert_eq!(valid().validate(), Ok(()));
    }

    #[test]
    fn missing_host_rejected() {
        let params = ConnectionParameters::default();
        assert_eq!(
            params.validate(),
            Err(ConfigurationError::MissingStreamHost)
        );

        let blank = ConnectionParameters::new("   ");
        assert_eq!(blank.validate(), Err(ConfigurationError::MissingStreamHost));
    }

    #[test]
    fn heartbeat_interval_floor_only_applies_when_enabled() {
        let params = valid().with_heartbeat(Duration::from_millis(50));
        assert!(matches!(
            params.validate(),
            Err(ConfigurationError::HeartbeatIntervalTooSmall { .. })
        ));

        let disabled = params.without_heartbeat();
        assert_eq!(disabled.validate(), Ok(()));
    }

    #[test]
    fn timeout_must_exceed_heartbeat_interval() {
        let params = valid()
            .with_heartbeat(Duration::from_secs(1))
            .with_connection_timeout(Some(Duration::from_millis(1050)));
        assert!(matches!(
            params.validate(),
            Err(ConfigurationError::TimeoutShorterThanHeartbeat { .. })
        ));

        let enough = params.with_connection_timeout(Some(Duration::from_millis(1100)));
        assert_eq!(enough.validate(), Ok(()));
    }

    #[test]
    fn huge_heartbeat_interval_is_rejected_without_overflow() {
        let params = valid()
            .with_heartbeat(Duration::MAX)
            .with_connection_timeout(Some(Duration::from_secs(60)));
        assert!(matches!(
            params.validate(),
            Err(ConfigurationError::TimeoutShorterThanHeartbeat { .. })
        ));

        let disabled = params.without_heartbeat();
        assert_eq!(disabled.validate(), Ok(()));
    }

    #[test]
    fn infinite_timeout_is_always_accepted() {
        let params = valid()
            .with_heartbeat(Duration::from_millis(100))
            .with_connection_timeout(None);
        assert_eq!(params.validate(), Ok(()));
    }

    #[test_case(99, false ; "just below floor")]
    #[test_case(100, true ; "at floor")]
    #[test_case(5_000, true ; "well above floor")]
    fn timeout_floor(millis: u64, ok: bool) {
        let params = ConnectionParameters::new("wss://h")
            .with_connection_timeout(Some(Duration::from_millis(millis)));
        assert_eq!(params.validate().is_ok(), ok);
    }

    #[test_case(0, Some(1))]
    #[test_case(3, Some(4))]
    fn limited_attempts_total(retries: u32, expected: Option<u64>) {
        assert_eq!(
            ReconnectionAttempts::Limited(retries).total_attempts(),
            expected
        );
    }

    #[test_case(0, 200 ; "zero interval is floored")]
    #[test_case(150, 200 ; "short interval is floored")]
    #[test_case(5_000, 5_000 ; "long interval kept")]
    fn retry_delay_floor(interval_ms: u64, expected_ms: u64) {
        let params = valid().with_reconnection(
            ReconnectionAttempts::Limited(1),
            Duration::from_millis(interval_ms),
        );
        assert_eq!(params.retry_delay(), Duration::from_millis(expected_ms));
    }

    #[test]
    fn negative_count_means_infinite() {
        assert_eq!(
            ReconnectionAttempts::from_signed(-1),
            ReconnectionAttempts::Infinite
        );
        assert_eq!(
            ReconnectionAttempts::from_signed(2),
            ReconnectionAttempts::Limited(2)
        );
        assert!(ReconnectionAttempts::Infinite.allows(u64::MAX - 1));
        assert!(!ReconnectionAttempts::Limited(1).allows(2));
    }

    proptest! {
        #[test]
        fn validated_heartbeat_never_outruns_timeout(
            heartbeat_ms in 0u64..10_000,
            timeout_ms in 0u64..10_000,
        ) {
            let params = ConnectionParameters::new("wss://h")
                .with_heartbeat(Duration::from_millis(heartbeat_ms))
                .with_connection_timeout(Some(Duration::from_millis(timeout_ms)));

            if params.validate().is_ok() {
                prop_assert!(heartbeat_ms >= 100);
                prop_assert!(timeout_ms >= heartbeat_ms + 100);
            }
        }
    }
}
