//! Message Router
//!
//! Classifies decoded inbound frames by structure and fans them out to the
//! listeners registered for that kind. Frames are checked in priority order
//! (acknowledgement, trade batch, ticker batch); the first match wins and
//! frames matching nothing are dropped.
//!
//! Listeners are invoked inline on the receive task, in registration order.
//! Registering or dropping a [`Subscription`] from inside a listener is safe:
//! dispatch iterates over a snapshot of the registry.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::messages::{DataFrame, InboundAck, OneOrMany, TickerBatch, TickerUpdate, TradeBatch};
use crate::infrastructure::metrics;

/// Kind of a routed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Request acknowledgement.
    Ack,
    /// Public trade batch.
    Trades,
    /// Ticker snapshot or delta.
    TickerUpdates,
}

impl FrameKind {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ack => "ack",
            Self::Trades => "trades",
            Self::TickerUpdates => "ticker_updates",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Classification
// =============================================================================

const TRADE_FIELDS: [&str; 6] = ["i", "T", "s", "S", "v", "p"];

/// Structural classification of a frame, without deserializing it.
#[must_use]
pub fn classify(frame: &Value) -> Option<FrameKind> {
    let object = frame.as_object()?;

    if is_ack(object) {
        return Some(FrameKind::Ack);
    }

    let data = data_payload(object)?;
    if is_trade_batch(data) {
        Some(FrameKind::Trades)
    } else if is_ticker_batch(data) {
        Some(FrameKind::TickerUpdates)
    } else {
        None
    }
}

fn is_ack(object: &Map<String, Value>) -> bool {
    object.get("op").is_some_and(Value::is_string)
        && object.get("success").is_some_and(Value::is_boolean)
}

fn data_payload(object: &Map<String, Value>) -> Option<&Value> {
    let enveloped = object.get("topic").is_some_and(Value::is_string)
        && object.get("type").is_some_and(Value::is_string)
        && object.get("ts").is_some_and(Value::is_i64);
    if enveloped { object.get("data") } else { None }
}

fn is_trade_batch(data: &Value) -> bool {
    data.as_array().is_some_and(|entries| {
        !entries.is_empty()
            && entries.iter().all(|entry| {
                entry
                    .as_object()
                    .is_some_and(|e| TRADE_FIELDS.iter().all(|field| e.contains_key(*field)))
            })
    })
}

fn is_ticker_batch(data: &Value) -> bool {
    let has_symbol = |entry: &Value| entry.get("symbol").is_some_and(Value::is_string);
    match data {
        Value::Object(_) => has_symbol(data),
        Value::Array(entries) => !entries.is_empty() && entries.iter().all(has_symbol),
        _ => false,
    }
}

// =============================================================================
// Listener Registry
// =============================================================================

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerSet<T> {
    entries: RwLock<Vec<(u64, Callback<T>)>>,
}

impl<T> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }
}

impl<T> ListenerSet<T> {
    fn insert(&self, id: u64, callback: Callback<T>) {
        self.entries.write().push((id, callback));
    }

    fn remove(&self, id: u64) {
        self.entries.write().retain(|(entry_id, _)| *entry_id != id);
    }

    fn snapshot(&self) -> Vec<Callback<T>> {
        self.entries.read().iter().map(|(_, cb)| Arc::clone(cb)).collect()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    acks: ListenerSet<InboundAck>,
    trades: ListenerSet<TradeBatch>,
    tickers: ListenerSet<TickerBatch>,
}

impl Registry {
    fn remove(&self, kind: FrameKind, id: u64) {
        match kind {
            FrameKind::Ack => self.acks.remove(id),
            FrameKind::Trades => self.trades.remove(id),
            FrameKind::TickerUpdates => self.tickers.remove(id),
        }
    }
}

/// Registration handle. The listener stays registered until this is dropped.
#[must_use = "dropping a Subscription immediately deregisters its listener"]
pub struct Subscription {
    registry: Weak<Registry>,
    kind: FrameKind,
    id: u64,
}

impl Subscription {
    /// Kind of frames this listener receives.
    #[must_use]
    pub const fn kind(&self) -> FrameKind {
        self.kind
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.kind, self.id);
        }
    }
}

// =============================================================================
// Router
// =============================================================================

/// Shape-based dispatcher for inbound frames.
#[derive(Default)]
pub struct MessageRouter {
    registry: Arc<Registry>,
}

impl fmt::Debug for MessageRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRouter")
            .field("acks", &self.registry.acks.len())
            .field("trades", &self.registry.trades.len())
            .field("tickers", &self.registry.tickers.len())
            .finish()
    }
}

impl MessageRouter {
    /// Create a router with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for request acknowledgements.
    pub fn on_ack<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&InboundAck) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.registry.acks.insert(id, Arc::new(listener));
        self.subscription(FrameKind::Ack, id)
    }

    /// Listen for trade batches.
    pub fn on_trades<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&TradeBatch) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.registry.trades.insert(id, Arc::new(listener));
        self.subscription(FrameKind::Trades, id)
    }

    /// Listen for ticker batches.
    pub fn on_ticker_updates<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&TickerBatch) + Send + Sync + 'static,
    {
        let id = self.allocate_id();
        self.registry.tickers.insert(id, Arc::new(listener));
        self.subscription(FrameKind::TickerUpdates, id)
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: FrameKind) -> usize {
        match kind {
            FrameKind::Ack => self.registry.acks.len(),
            FrameKind::Trades => self.registry.trades.len(),
            FrameKind::TickerUpdates => self.registry.tickers.len(),
        }
    }

    /// Classify `frame` and dispatch it to the listeners of its kind.
    ///
    /// Returns the kind the frame was delivered as, or `None` when it matched
    /// no kind or failed to deserialize.
    pub fn route(&self, frame: &Value) -> Option<FrameKind> {
        let Some(kind) = classify(frame) else {
            tracing::debug!("Dropping unrecognized frame");
            metrics::record_frame_dropped("unrecognized");
            return None;
        };

        let delivered = match kind {
            FrameKind::Ack => dispatch::<InboundAck>(&self.registry.acks, frame, kind),
            FrameKind::Trades => dispatch::<TradeBatch>(&self.registry.trades, frame, kind),
            FrameKind::TickerUpdates => match decode::<DataFrame<OneOrMany<TickerUpdate>>>(frame, kind) {
                Some(batch) => {
                    notify(&self.registry.tickers, &batch.map(OneOrMany::into_vec));
                    true
                }
                None => false,
            },
        };

        if delivered {
            metrics::record_frame_received(kind.as_str());
            Some(kind)
        } else {
            metrics::record_frame_dropped("undecodable");
            None
        }
    }

    fn allocate_id(&self) -> u64 {
        self.registry.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn subscription(&self, kind: FrameKind, id: u64) -> Subscription {
        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
        }
    }
}

fn decode<T: DeserializeOwned>(frame: &Value, kind: FrameKind) -> Option<T> {
    match T::deserialize(frame) {
        Ok(message) => Some(message),
        Err(e) => {
            tracing::warn!(kind = %kind, error = %e, "Failed to decode frame");
            None
        }
    }
}

fn dispatch<T: DeserializeOwned>(listeners: &ListenerSet<T>, frame: &Value, kind: FrameKind) -> bool {
    decode::<T>(frame, kind).is_some_and(|message| {
        notify(listeners, &message);
        true
    })
}

fn notify<T>(listeners: &ListenerSet<T>, message: &T) {
    for listener in listeners.snapshot() {
        listener(message);
    }
}
