//! Bybit v5 Public Stream
//!
//! Wire messages, request construction, frame routing, acknowledgement
//! correlation and the [`MarketDataProvider`] facade that ties them to a
//! [`ConnectionEngine`](crate::infrastructure::connection::ConnectionEngine).

pub mod correlator;
pub mod heartbeat;
pub mod mapping;
pub mod messages;
pub mod provider;
pub mod requests;
pub mod router;

pub use correlator::{CorrelationError, PayloadSender, RequestCorrelator};
pub use heartbeat::BybitHeartbeat;
pub use mapping::{MappingError, to_trade, trades_from_batch};
pub use messages::{
    DataFrame, HeartbeatRequest, InboundAck, OutboundRequest, StreamOperation, TickerBatch,
    TickerUpdate, TradeBatch, TradeDescription,
};
pub use provider::{MarketDataProvider, ProviderError};
pub use requests::{StreamRequestFactory, ticker_topic, trade_topic};
pub use router::{FrameKind, MessageRouter, Subscription, classify};
