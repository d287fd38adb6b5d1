//! Request Correlator
//!
//! Turns "send a request, then wait for the acknowledgement carrying the same
//! id" into one awaitable call. Each call registers a one-shot ack listener on
//! the router; the listener is removed on every exit path because it lives in
//! a [`Subscription`](super::router::Subscription) local to the call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::messages::{InboundAck, OutboundRequest};
use super::router::MessageRouter;
use crate::infrastructure::connection::SendError;

/// Default time to wait for an acknowledgement.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Something that can put a request on the wire.
#[async_trait]
pub trait PayloadSender: Send + Sync {
    /// Send `request` without waiting for a reply.
    async fn send_request(&self, request: &OutboundRequest) -> Result<(), SendError>;
}

/// Correlation failures.
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    /// The request could not be sent.
    #[error("request {req_id} could not be sent: {source}")]
    Send {
        /// Request id.
        req_id: String,
        /// Underlying send error.
        #[source]
        source: SendError,
    },

    /// No acknowledgement arrived in time.
    #[error("no acknowledgement for request {req_id} within {timeout:?}")]
    TimedOut {
        /// Request id.
        req_id: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// The router was dropped before an acknowledgement arrived.
    #[error("request {req_id} was abandoned before acknowledgement")]
    Abandoned {
        /// Request id.
        req_id: String,
    },
}

/// Matches acknowledgements to outstanding requests by `req_id`.
#[derive(Debug, Clone)]
pub struct RequestCorrelator {
    router: Arc<MessageRouter>,
    timeout: Duration,
}

impl RequestCorrelator {
    /// Correlate through `router` with the default timeout.
    #[must_use]
    pub const fn new(router: Arc<MessageRouter>) -> Self {
        Self {
            router,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Override the acknowledgement timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Acknowledgement timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `request` through `sender` and wait for its acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError`] if sending fails, the timeout elapses, or
    /// the router goes away first. A negative acknowledgement is not an error
    /// here; inspect [`InboundAck::success`].
    pub async fn request(
        &self,
        sender: &dyn PayloadSender,
        request: OutboundRequest,
    ) -> Result<InboundAck, CorrelationError> {
        let req_id = request.req_id.clone();
        let (ack_tx, ack_rx) = oneshot::channel();
        let slot = Mutex::new(Some(ack_tx));

        let expected = req_id.clone();
        let _listener = self.router.on_ack(move |ack| {
            if ack.req_id.as_deref() == Some(expected.as_str())
                && let Some(tx) = slot.lock().take()
            {
                let _ = tx.send(ack.clone());
            }
        });

        tracing::debug!(req_id = %req_id, op = %request.op, args = ?request.args, "Sending request");

        if let Err(source) = sender.send_request(&request).await {
            return Err(CorrelationError::Send { req_id, source });
        }

        match tokio::time::timeout(self.timeout, ack_rx).await {
            Ok(Ok(ack)) => {
                tracing::debug!(req_id = %req_id, success = ack.success, "Request acknowledged");
                Ok(ack)
            }
            Ok(Err(_)) => Err(CorrelationError::Abandoned { req_id }),
            Err(_) => {
                tracing::warn!(req_id = %req_id, timeout_ms = self.timeout.as_millis(), "Request timed out");
                Err(CorrelationError::TimedOut {
                    req_id,
                    timeout: self.timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::infrastructure::bybit::router::FrameKind;

    /// Sender that acknowledges through the router right away.
    struct EchoSender {
        router: Arc<MessageRouter>,
        success: bool,
    }

    #[async_trait]
    impl PayloadSender for EchoSender {
        async fn send_request(&self, request: &OutboundRequest) -> Result<(), SendError> {
            let ret_msg = if self.success { "" } else { "rejected" };
            self.router.route(&json!({"req_id": "unrelated", "op": request.op, "success": true}));
            self.router.route(&json!({
                "req_id": request.req_id,
                "op": request.op,
                "success": self.success,
                "ret_msg": ret_msg,
            }));
            Ok(())
        }
    }

    struct SilentSender;

    #[async_trait]
    impl PayloadSender for SilentSender {
        async fn send_request(&self, _request: &OutboundRequest) -> Result<(), SendError> {
            Ok(())
        }
    }

    struct OfflineSender;

    #[async_trait]
    impl PayloadSender for OfflineSender {
        async fn send_request(&self, _request: &OutboundRequest) -> Result<(), SendError> {
            Err(SendError::NotConnected)
        }
    }

    fn request(id: &str) -> OutboundRequest {
        OutboundRequest {
            req_id: id.into(),
            op: "subscribe".into(),
            args: vec!["publicTrade.BTCUSDT".into()],
        }
    }

    #[tokio::test]
    async fn resolves_with_matching_ack_and_leaves_no_listener() {
        let router = Arc::new(MessageRouter::new());
        let correlator = RequestCorrelator::new(Arc::clone(&router));
        let sender = EchoSender {
            router: Arc::clone(&router),
            success: true,
        };

        let ack = correlator.request(&sender, request("11")).await.unwrap();

        assert_eq!(ack.req_id.as_deref(), Some("11"));
        assert!(ack.success);
        assert_eq!(router.listener_count(FrameKind::Ack), 0);
    }

    #[tokio::test]
    async fn negative_ack_is_returned() {
        let router = Arc::new(MessageRouter::new());
        let correlator = RequestCorrelator::new(Arc::clone(&router));
        let sender = EchoSender {
            router: Arc::clone(&router),
            success: false,
        };

        let ack = correlator.request(&sender, request("3")).await.unwrap();
        assert!(!ack.success);
        assert_eq!(ack.ret_msg.as_deref(), Some("rejected"));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_and_leaves_no_listener() {
        let router = Arc::new(MessageRouter::new());
        let correlator =
            RequestCorrelator::new(Arc::clone(&router)).with_timeout(Duration::from_secs(5));

        let err = correlator.request(&SilentSender, request("8")).await.unwrap_err();

        assert!(matches!(err, CorrelationError::TimedOut { ref req_id, .. } if req_id == "8"));
        assert_eq!(router.listener_count(FrameKind::Ack), 0);
    }

    #[tokio::test]
    async fn send_failure_leaves_no_listener() {
        let router = Arc::new(MessageRouter::new());
        let correlator = RequestCorrelator::new(Arc::clone(&router));

        let err = correlator.request(&OfflineSender, request("9")).await.unwrap_err();

        assert!(matches!(
            err,
            CorrelationError::Send {
                source: SendError::NotConnected,
                ..
            }
        ));
        assert_eq!(router.listener_count(FrameKind::Ack), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_resolve_independently() {
        let router = Arc::new(MessageRouter::new());
        let correlator =
            RequestCorrelator::new(Arc::clone(&router)).with_timeout(Duration::from_secs(5));

        let first = correlator.request(&SilentSender, request("1"));
        let second = correlator.request(&SilentSender, request("2"));
        let acker = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            assert_eq!(router.listener_count(FrameKind::Ack), 2);
            router.route(&json!({"req_id": "2", "op": "subscribe", "success": true}));
            router.route(&json!({"req_id": "1", "op": "subscribe", "success": false}));
        };

        let (first, second, ()) = tokio::join!(first, second, acker);
        assert!(!first.unwrap().success);
        assert!(second.unwrap().success);
        assert_eq!(router.listener_count(FrameKind::Ack), 0);
    }

    #[tokio::test]
    async fn dropped_request_leaves_no_listener() {
        let router = Arc::new(MessageRouter::new());
        let correlator = RequestCorrelator::new(Arc::clone(&router));

        {
            let pending = correlator.request(&SilentSender, request("4"));
            let _ = tokio::time::timeout(Duration::from_millis(5), pending).await;
        }

        assert_eq!(router.listener_count(FrameKind::Ack), 0);
    }
}
