//! Heartbeat Port
//!
//! Supplies keep-alive messages and recognizes their replies, so the
//! connection engine stays protocol-agnostic.

use serde_json::Value;

/// Port for keep-alive message generation and reply detection.
#[cfg_attr(test, mockall::automock)]
pub trait HeartbeatProvider: Send + Sync {
    /// Next keep-alive message. Each call must carry a fresh id.
    fn next_message(&self) -> Value;

    /// Whether an inbound frame is a reply to a keep-alive message.
    fn is_heartbeat_reply(&self, frame: &Value) -> bool;
}

/// Heartbeat provider that never produces replies to filter.
///
/// Useful when heartbeating is disabled.
#[derive(Debug, Clone, Default)]
pub struct NoOpHeartbeat;

impl HeartbeatProvider for NoOpHeartbeat {
    fn next_message(&self) -> Value {
        Value::Null
    }

    fn is_heartbeat_reply(&self, _frame: &Value) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_op_heartbeat_filters_nothing() {
        let heartbeat = NoOpHeartbeat;
        assert!(!heartbeat.is_heartbeat_reply(&serde_json::json!({"op": "pong"})));
        assert_eq!(heartbeat.next_message(), Value::Null);
    }
}
