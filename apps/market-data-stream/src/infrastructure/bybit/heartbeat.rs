//! Bybit keep-alive messages.

use std::sync::Arc;

use serde_json::Value;

use super::messages::StreamOperation;
use super::requests::StreamRequestFactory;
use crate::application::ports::HeartbeatProvider;

/// `{"req_id": <n>, "op": "ping"}` pings; replies carry `"op": "pong"`.
#[derive(Debug, Clone)]
pub struct BybitHeartbeat {
    requests: Arc<StreamRequestFactory>,
}

impl BybitHeartbeat {
    /// Draw ids from `requests`.
    #[must_use]
    pub const fn new(requests: Arc<StreamRequestFactory>) -> Self {
        Self { requests }
    }
}

impl HeartbeatProvider for BybitHeartbeat {
    fn next_message(&self) -> Value {
        let request = self.requests.heartbeat();
        serde_json::json!({ "req_id": request.req_id, "op": request.op })
    }

    fn is_heartbeat_reply(&self, frame: &Value) -> bool {
        frame
            .get("op")
            .and_then(Value::as_str)
            .is_some_and(|op| op.eq_ignore_ascii_case(StreamOperation::Pong.as_str()))
    }
}
