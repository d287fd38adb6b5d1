//! Request Factory
//!
//! Builds outbound control messages with ids drawn from one shared counter,
//! so subscriptions and heartbeats on the same connection never reuse an id.

use std::sync::atomic::{AtomicU64, Ordering};

use super::messages::{HeartbeatRequest, OutboundRequest, StreamOperation};

/// Topic carrying public trades for a ticker.
#[must_use]
pub fn trade_topic(ticker: &str) -> String {
    format!("publicTrade.{ticker}")
}

/// Topic carrying ticker updates for a ticker.
#[must_use]
pub fn ticker_topic(ticker: &str) -> String {
    format!("tickers.{ticker}")
}

/// Source of strictly increasing request ids.
#[derive(Debug, Default)]
pub struct StreamRequestFactory {
    last_id: AtomicU64,
}

impl StreamRequestFactory {
    /// Create a factory whose first id is 1.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last_id: AtomicU64::new(0),
        }
    }

    /// Allocate the next id.
    pub fn next_id(&self) -> u64 {
        self.last_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Subscribe request for `topics`.
    pub fn subscribe<I, S>(&self, topics: I) -> OutboundRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request(StreamOperation::Subscribe, topics)
    }

    /// Unsubscribe request for `topics`.
    pub fn unsubscribe<I, S>(&self, topics: I) -> OutboundRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.request(StreamOperation::Unsubscribe, topics)
    }

    /// Keep-alive request.
    pub fn heartbeat(&self) -> HeartbeatRequest {
        HeartbeatRequest {
            req_id: self.next_id(),
            op: StreamOperation::Ping.as_str().to_owned(),
        }
    }

    fn request<I, S>(&self, op: StreamOperation, topics: I) -> OutboundRequest
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OutboundRequest {
            req_id: self.next_id().to_string(),
            op: op.as_str().to_owned(),
            args: topics.into_iter().map(Into::into).collect(),
        }
    }
}
