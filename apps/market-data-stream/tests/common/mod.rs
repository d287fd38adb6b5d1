//! Scripted transport shared by the integration tests.
//!
//! Connect and close outcomes are scripted up front; inbound frames are pushed
//! by the test or produced by a responder that sees every outbound frame.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::Instant;

use market_data_stream::{ConnectionParameters, Frame, Transport, TransportError, TransportState};

pub const HOST: &str = "wss://stream.scripted.test/v5/public/spot";

/// Outcome of one `connect` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Succeed,
    SucceedAfter(Duration),
    Fail,
    Hang,
}

/// Outcome of `close`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    Succeed,
    Fail,
    Hang,
}

type Responder = Box<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

struct Inner {
    state: Mutex<TransportState>,
    connects: Mutex<VecDeque<ConnectOutcome>>,
    fallback_connect: Mutex<ConnectOutcome>,
    connect_times: Mutex<Vec<Instant>>,
    close_outcome: Mutex<CloseOutcome>,
    close_calls: AtomicUsize,
    sent: Mutex<Vec<String>>,
    responder: Mutex<Option<Responder>>,
    inbound_tx: mpsc::UnboundedSender<Result<Frame, TransportError>>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Frame, TransportError>>>,
}

/// Cloneable handle; clones share one script.
#[derive(Clone)]
pub struct ScriptedTransport {
    inner: Arc<Inner>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(TransportState::Closed),
                connects: Mutex::new(VecDeque::new()),
                fallback_connect: Mutex::new(ConnectOutcome::Succeed),
                connect_times: Mutex::new(Vec::new()),
                close_outcome: Mutex::new(CloseOutcome::Succeed),
                close_calls: AtomicUsize::new(0),
                sent: Mutex::new(Vec::new()),
                responder: Mutex::new(None),
                inbound_tx,
                inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            }),
        }
    }
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next connects; later connects use the fallback.
    pub fn script_connects(&self, outcomes: impl IntoIterator<Item = ConnectOutcome>) -> &Self {
        self.inner.connects.lock().extend(outcomes);
        self
    }

    pub fn always_connect(&self, outcome: ConnectOutcome) -> &Self {
        *self.inner.fallback_connect.lock() = outcome;
        self
    }

    pub fn close_with(&self, outcome: CloseOutcome) -> &Self {
        *self.inner.close_outcome.lock() = outcome;
        self
    }

    /// Answer outbound frames; `None` sends nothing back.
    pub fn respond_with<F>(&self, responder: F) -> &Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        *self.inner.responder.lock() = Some(Box::new(responder));
        self
    }

    /// Acknowledge subscribe/unsubscribe requests and answer pings.
    pub fn acknowledging(&self) -> &Self {
        self.respond_with(|frame| ack_for(frame, true, ""))
    }

    pub fn push(&self, frame: Value) {
        self.push_raw(Frame::Text(frame.to_string()));
    }

    pub fn push_raw(&self, frame: Frame) {
        self.inner.inbound_tx.send(Ok(frame)).unwrap();
    }

    pub fn push_error(&self, error: TransportError) {
        self.inner.inbound_tx.send(Err(error)).unwrap();
    }

    /// Drop the socket without waking a pending `receive`.
    pub fn sever(&self) {
        self.set_state(TransportState::Aborted);
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connect_times.lock().len()
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.inner.connect_times.lock().clone()
    }

    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Value> {
        self.inner
            .sent
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }

    pub fn sent_with_op(&self, op: &str) -> Vec<Value> {
        self.sent()
            .into_iter()
            .filter(|frame| frame["op"] == op)
            .collect()
    }

    fn set_state(&self, state: TransportState) {
        *self.inner.state.lock() = state;
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn state(&self) -> TransportState {
        *self.inner.state.lock()
    }

    async fn connect(&self, _url: &str) -> Result<(), TransportError> {
        self.inner.connect_times.lock().push(Instant::now());
        let outcome = self
            .inner
            .connects
            .lock()
            .pop_front()
            .unwrap_or_else(|| *self.inner.fallback_connect.lock());

        self.set_state(TransportState::Connecting);
        match outcome {
            ConnectOutcome::Succeed => {}
            ConnectOutcome::SucceedAfter(delay) => tokio::time::sleep(delay).await,
            ConnectOutcome::Fail => {
                self.set_state(TransportState::Closed);
                return Err(TransportError::Socket("connection refused".into()));
            }
            ConnectOutcome::Hang => std::future::pending::<()>().await,
        }
        self.set_state(TransportState::Open);
        Ok(())
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if !self.state().is_open() {
            return Err(TransportError::NotConnected);
        }
        let Some(text) = frame.as_text().map(str::to_owned) else {
            return Ok(());
        };

        let reply = serde_json::from_str::<Value>(&text).ok().and_then(|value| {
            self.inner
                .responder
                .lock()
                .as_ref()
                .and_then(|respond| respond(&value))
        });
        self.inner.sent.lock().push(text);

        if let Some(reply) = reply {
            self.push(reply);
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Frame, TransportError> {
        let mut inbound = self.inner.inbound_rx.lock().await;
        match inbound.recv().await {
            Some(Ok(frame)) => Ok(frame),
            Some(Err(error)) => {
                if error.is_fault() {
                    self.set_state(TransportState::Aborted);
                }
                Err(error)
            }
            None => std::future::pending().await,
        }
    }

    async fn close(&self, _reason: &str) -> Result<(), TransportError> {
        self.inner.close_calls.fetch_add(1, Ordering::SeqCst);
        self.set_state(TransportState::Closing);
        let outcome = *self.inner.close_outcome.lock();
        match outcome {
            CloseOutcome::Succeed => {
                self.set_state(TransportState::Closed);
                Ok(())
            }
            CloseOutcome::Fail => {
                self.set_state(TransportState::Closed);
                Err(TransportError::Socket("close handshake failed".into()))
            }
            CloseOutcome::Hang => std::future::pending().await,
        }
    }

    fn abort(&self) {
        let mut state = self.inner.state.lock();
        if *state != TransportState::Closed {
            *state = TransportState::Aborted;
        }
    }
}

/// Acknowledgement for a subscribe/unsubscribe request, or a pong for a ping.
pub fn ack_for(frame: &Value, success: bool, ret_msg: &str) -> Option<Value> {
    match frame["op"].as_str()? {
        "ping" => Some(json!({
            "success": true,
            "ret_msg": "pong",
            "conn_id": "scripted",
            "req_id": frame["req_id"].to_string(),
            "op": "pong"
        })),
        op @ ("subscribe" | "unsubscribe") => Some(json!({
            "success": success,
            "ret_msg": ret_msg,
            "conn_id": "scripted",
            "req_id": frame["req_id"],
            "op": op
        })),
        _ => None,
    }
}

/// Parameters for a scripted host with heartbeats off and no timeout.
pub fn quiet_parameters() -> ConnectionParameters {
    ConnectionParameters::new(HOST)
        .with_connection_timeout(None)
        .without_heartbeat()
}

pub fn trade_frame(symbol: &str, trade_id: &str, price: &str) -> Value {
    json!({
        "topic": format!("publicTrade.{symbol}"),
        "type": "snapshot",
        "ts": 1_672_304_486_868_i64,
        "data": [{
            "T": 1_672_304_486_865_i64,
            "s": symbol,
            "S": "Buy",
            "v": "0.001",
            "p": price,
            "L": "PlusTick",
            "i": trade_id,
            "BT": false
        }]
    })
}

/// Let spawned tasks drain pending work.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}
