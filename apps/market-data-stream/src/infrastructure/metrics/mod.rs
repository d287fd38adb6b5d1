//! Prometheus Metrics Module
//!
//! Exposes stream client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: inbound frames by routed kind, and frames dropped by reason
//! - **Connection**: connect attempts by outcome, reconnects, current state
//! - **Heartbeat**: keep-alive messages sent
//!
//! # Integration
//!
//! When a port is configured, the binary installs an HTTP listener that
//! serves `/metrics`. Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::connection::ConnectionState;

// =============================================================================
// Installation
// =============================================================================

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus recorder with an HTTP listener on `port`.
///
/// Subsequent calls are no-ops returning the address of the first listener.
///
/// # Errors
///
/// Returns an error if the recorder or the listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<SocketAddr, BuildError> {
    if let Some(addr) = INSTALLED.get() {
        return Ok(*addr);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    register_metrics();
    Ok(*INSTALLED.get_or_init(|| addr))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_stream_frames_received_total",
        "Inbound frames routed to listeners, by kind"
    );
    describe_counter!(
        "market_stream_frames_dropped_total",
        "Inbound frames discarded, by reason"
    );
    describe_counter!(
        "market_stream_connect_attempts_total",
        "Transport connect attempts, by outcome"
    );
    describe_counter!(
        "market_stream_reconnects_total",
        "Automatic reconnects triggered by the receive loop"
    );
    describe_counter!(
        "market_stream_heartbeats_sent_total",
        "Keep-alive messages sent"
    );
    describe_gauge!(
        "market_stream_connection_state",
        "Current connection state (0 disconnected, 1 connecting, 2 connected, 3 disconnecting)"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for a single transport connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Transport reported open.
    Succeeded,
    /// Transport returned an error or never opened.
    Failed,
    /// Per-attempt connection timeout elapsed.
    TimedOut,
}

impl AttemptOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// Record a frame routed to listeners.
pub fn record_frame_received(kind: &'static str) {
    counter!("market_stream_frames_received_total", "kind" => kind).increment(1);
}

/// Record a discarded inbound frame.
pub fn record_frame_dropped(reason: &'static str) {
    counter!("market_stream_frames_dropped_total", "reason" => reason).increment(1);
}

/// Record a transport connect attempt.
pub fn record_connect_attempt(outcome: AttemptOutcome) {
    counter!(
        "market_stream_connect_attempts_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record an automatic reconnect.
pub fn record_reconnect() {
    counter!("market_stream_reconnects_total").increment(1);
}

/// Record a keep-alive message sent.
pub fn record_heartbeat_sent() {
    counter!("market_stream_heartbeats_sent_total").increment(1);
}

/// Publish the current connection state.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("market_stream_connection_state").set(state_value(state));
}

const fn state_value(state: ConnectionState) -> f64 {
    match state {
        ConnectionState::Disconnected => 0.0,
        ConnectionState::Connecting => 1.0,
        ConnectionState::Connected => 2.0,
        ConnectionState::Disconnecting => 3.0,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_outcome_as_str() {
        assert_eq!(AttemptOutcome::Succeeded.as_str(), "succeeded");
        assert_eq!(AttemptOutcome::Failed.as_str(), "failed");
        assert_eq!(AttemptOutcome::TimedOut.as_str(), "timed_out");
    }

    #[test]
    fn state_gauge_values_are_distinct() {
        let values = [
            state_value(ConnectionState::Disconnected),
            state_value(ConnectionState::Connecting),
            state_value(ConnectionState::Connected),
            state_value(ConnectionState::Disconnecting),
        ];
        for (i, a) in values.iter().enumerate() {
            for b in &values[i + 1..] {
                assert!((a - b).abs() > f64::EPSILON);
            }
        }
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received("trades");
        record_frame_dropped("invalid_json");
        record_connect_attempt(AttemptOutcome::Failed);
        record_reconnect();
        record_heartbeat_sent();
        set_connection_state(ConnectionState::Connected);
    }
}
