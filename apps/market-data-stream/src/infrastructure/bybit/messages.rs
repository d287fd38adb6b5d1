//! Bybit v5 WebSocket Message Types
//!
//! Wire format types for the public market-data stream. Inbound frames carry
//! no discriminator field; the router classifies them by shape and then
//! deserializes into one of these types.
//!
//! # Message Types
//!
//! ## Control Messages
//! - `OutboundRequest`: subscribe / unsubscribe request
//! - `HeartbeatRequest`: keep-alive ping
//! - `InboundAck`: acknowledgement of a request
//!
//! ## Data Messages
//! - `DataFrame<Vec<TradeDescription>>`: public trade batch
//! - `DataFrame<Vec<TickerUpdate>>`: ticker snapshot or delta
//!
//! # References
//!
//! - [WebSocket Connect](https://bybit-exchange.github.io/docs/v5/ws/connect)
//! - [Public Trade](https://bybit-exchange.github.io/docs/v5/websocket/public/trade)
//! - [Ticker](https://bybit-exchange.github.io/docs/v5/websocket/public/ticker)

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Control Messages
// =============================================================================

/// Operation names used on the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamOperation {
    /// Subscribe to topics.
    Subscribe,
    /// Unsubscribe from topics.
    Unsubscribe,
    /// Keep-alive request.
    Ping,
    /// Keep-alive reply.
    Pong,
}

impl StreamOperation {
    /// Wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Ping => "ping",
            Self::Pong => "pong",
        }
    }
}

/// Request sent to the stream.
///
/// # Wire Format (JSON)
/// ```json
/// {"req_id": "12", "op": "subscribe", "args": ["publicTrade.BTCUSDT"]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundRequest {
    /// Correlation id, echoed back in the acknowledgement.
    pub req_id: String,
    /// Operation name.
    pub op: String,
    /// Topics the operation applies to.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Keep-alive request. Unlike other requests its id is numeric.
///
/// # Wire Format (JSON)
/// ```json
/// {"req_id": 42, "op": "ping"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    /// Strictly increasing id.
    pub req_id: u64,
    /// Always "ping".
    pub op: String,
}

/// Acknowledgement of a request.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "success": true,
///   "ret_msg": "",
///   "conn_id": "cejreaspqfh3sjdnldmg-p",
///   "req_id": "12",
///   "op": "subscribe"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundAck {
    /// Id of the acknowledged request, absent when the request carried none.
    #[serde(default)]
    pub req_id: Option<String>,
    /// Operation acknowledged.
    pub op: String,
    /// Server-side connection id.
    #[serde(default)]
    pub conn_id: Option<String>,
    /// Server message; carries the rejection reason when `success` is false.
    #[serde(default)]
    pub ret_msg: Option<String>,
    /// Whether the request was accepted.
    pub success: bool,
}

// =============================================================================
// Data Messages
// =============================================================================

/// Envelope shared by every topic push.
///
/// # Wire Format (JSON)
/// ```json
/// {"topic": "publicTrade.BTCUSDT", "type": "snapshot", "ts": 1672304486868, "data": [...]}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFrame<T> {
    /// Topic the push belongs to.
    pub topic: String,
    /// `snapshot` or `delta`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Server timestamp in milliseconds.
    pub ts: i64,
    /// Cross sequence, present on some topics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cs: Option<i64>,
    /// Topic payload.
    pub data: T,
}

impl<T> DataFrame<T> {
    /// Transform the payload, keeping the envelope.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> DataFrame<U> {
        DataFrame {
            topic: self.topic,
            kind: self.kind,
            ts: self.ts,
            cs: self.cs,
            data: f(self.data),
        }
    }

    /// Whether this push is a full snapshot rather than a delta.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        self.kind.eq_ignore_ascii_case("snapshot")
    }
}

/// Payload that is sometimes one object and sometimes an array.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    /// Single object.
    One(T),
    /// Array of objects.
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    /// Flatten into a vector.
    #[must_use]
    pub fn into_vec(self) -> Vec<T> {
        match self {
            Self::One(item) => vec![item],
            Self::Many(items) => items,
        }
    }
}

/// One public trade.
///
/// # Wire Format (JSON)
/// ```json
/// {
///   "T": 1672304486865,
///   "s": "BTCUSDT",
///   "S": "Buy",
///   "v": "0.001",
///   "p": "16578.50",
///   "L": "PlusTick",
///   "i": "20f43950-d8dd-5b31-9112-a178eb6023af",
///   "BT": false
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeDescription {
    /// Trade id.
    #[serde(rename = "i")]
    pub trade_id: String,
    /// Fill time in milliseconds.
    #[serde(rename = "T")]
    pub timestamp_ms: i64,
    /// Symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Taker side, `Buy` or `Sell`.
    #[serde(rename = "S")]
    pub side: String,
    /// Size, as sent.
    #[serde(rename = "v")]
    pub size: String,
    /// Price, as sent.
    #[serde(rename = "p")]
    pub price: String,
    /// Tick direction.
    #[serde(rename = "L", default, skip_serializing_if = "Option::is_none")]
    pub tick_direction: Option<String>,
    /// Block trade flag.
    #[serde(rename = "BT", default, skip_serializing_if = "Option::is_none")]
    pub is_block_trade: Option<bool>,
}

/// Ticker snapshot or delta for any category.
///
/// Fields a category does not carry, or a delta omits, are `None`.
///
/// # Wire Format (JSON, spot)
/// ```json
/// {
///   "symbol": "BTCUSDT",
///   "lastPrice": "21109.77",
///   "highPrice24h": "21426.99",
///   "lowPrice24h": "20575",
///   "prevPrice24h": "20704.93",
///   "volume24h": "6780.866843",
///   "turnover24h": "141946527.22907118",
///   "price24hPcnt": "0.0196",
///   "usdIndexPrice": "21120.2400136"
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickerUpdate {
    /// Symbol.
    pub symbol: String,
    /// Last traded price.
    #[serde(default, deserialize_with = "optional_decimal")]
    pub last_price: Option<Decimal>,
    /// 24h high.
    #[serde(default, deserialize_with = "optional_decimal")]
    pub high_price_24h: Option<Decimal>,
    /// 24h low.
    #[serde(default, deserialize_with = "optional_decimal")]
    pub low_price_24h: Option<Decimal>,
    /// Price 24h ago.
    #[serde(default, deserialize_with = "optional_decimal")]
    pub prev_price_24h: Option<Decimal>,
    /// Price one hour ago.
    #[serde(default, deserialize_with = "optional_decimal")]
    pub prev_price_1h: Option<Decimal>,
    /// 24h volume.
    #[serde(default, deserialize_with = "optional_decimal")]
    pub volume_24h: Option<Decimal>,
    /// 24h turnover.
    #[serde(default, deserialize_with = "optional_decimal")]
    pub turnover_24h: Option<Decimal>,
    /// 24h change as a fraction.
    #[serde(default, deserialize_with = "optional_decimal")]
    pub price_24h_pcnt: Option<Decimal>,
    /// USD index price.
    #[serde(default, deserialize_with = "optional_decimal")]
    pub usd_index_price: Option<Decimal>,
    /// Best bid.
    #[serde(default, deserialize_with = "optional_decimal")]
    pub bid1_price: Option<Decimal>,
    /// Best bid size.
    #[serde(default, deserialize_with = "optional_decimal")]
    pub bid1_size: Option<Decimal>,
    /// Best ask.
    #[serde(default, deserialize_with = "optional_decimal")]
    pub ask1_price: Option<Decimal>,
    /// Best ask size.
    #[serde(default, deserialize_with = "optional_decimal")]
    pub ask1_size: Option<Decimal>,
    /// Mark price (derivatives).
    #[serde(default, deserialize_with = "optional_decimal")]
    pub mark_price: Option<Decimal>,
    /// Index price (derivatives).
    #[serde(default, deserialize_with = "optional_decimal")]
    pub index_price: Option<Decimal>,
    /// Open interest (derivatives).
    #[serde(default, deserialize_with = "optional_decimal")]
    pub open_interest: Option<Decimal>,
    /// Open interest value (derivatives).
    #[serde(default, deserialize_with = "optional_decimal")]
    pub open_interest_value: Option<Decimal>,
    /// Funding rate (perpetuals).
    #[serde(default, deserialize_with = "optional_decimal")]
    pub funding_rate: Option<Decimal>,
    /// Next funding time in milliseconds, as sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_funding_time: Option<String>,
    /// Underlying price (options).
    #[serde(default, deserialize_with = "optional_decimal")]
    pub underlying_price: Option<Decimal>,
    /// Implied volatility at the bid (options).
    #[serde(default, deserialize_with = "optional_decimal")]
    pub bid1_iv: Option<Decimal>,
    /// Implied volatility at the ask (options).
    #[serde(default, deserialize_with = "optional_decimal")]
    pub ask1_iv: Option<Decimal>,
    /// Delta (options).
    #[serde(default, deserialize_with = "optional_decimal")]
    pub delta: Option<Decimal>,
    /// Gamma (options).
    #[serde(default, deserialize_with = "optional_decimal")]
    pub gamma: Option<Decimal>,
    /// Vega (options).
    #[serde(default, deserialize_with = "optional_decimal")]
    pub vega: Option<Decimal>,
    /// Theta (options).
    #[serde(default, deserialize_with = "optional_decimal")]
    pub theta: Option<Decimal>,
}

/// Ticker batch after one-or-many normalisation.
pub type TickerBatch = DataFrame<Vec<TickerUpdate>>;

/// Trade batch.
pub type TradeBatch = DataFrame<Vec<TradeDescription>>;

// =============================================================================
// Decimal Helpers
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrText {
    Number(serde_json::Number),
    Text(String),
}

fn parse_decimal(raw: &str) -> Result<Decimal, rust_decimal::Error> {
    Decimal::from_str(raw).or_else(|_| Decimal::from_scientific(raw))
}

/// Decimal sent as a string or a number; empty strings become `None`.
fn optional_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match Option::<NumberOrText>::deserialize(deserializer)? {
        None => Ok(None),
        Some(NumberOrText::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(NumberOrText::Text(text)) => parse_decimal(text.trim()).map(Some).map_err(D::Error::custom),
        Some(NumberOrText::Number(number)) => {
            parse_decimal(&number.to_string()).map(Some).map_err(D::Error::custom)
        }
    }
}
