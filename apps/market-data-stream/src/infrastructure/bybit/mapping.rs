//! Conversion of stream DTOs into domain values.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::messages::{TradeBatch, TradeDescription};
use crate::domain::market::{Security, Side, Trade};

/// Why a trade entry was not converted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    /// No known security for the symbol.
    #[error("unknown symbol {0}")]
    UnknownSymbol(String),
    /// Side is neither `Buy` nor `Sell`.
    #[error("invalid side {0:?}")]
    InvalidSide(String),
    /// Price or size is not a decimal.
    #[error("invalid {field} {value:?}")]
    InvalidNumber {
        /// Field name.
        field: &'static str,
        /// Raw value.
        value: String,
    },
    /// Timestamp out of range.
    #[error("invalid timestamp {0}")]
    InvalidTimestamp(i64),
}

/// Convert one trade entry, resolving its symbol with `resolve`.
///
/// # Errors
///
/// Returns [`MappingError`] naming the first field that could not be converted.
pub fn to_trade<R>(entry: &TradeDescription, resolve: R) -> Result<Trade, MappingError>
where
    R: Fn(&str) -> Option<Security>,
{
    let security =
        resolve(&entry.symbol).ok_or_else(|| MappingError::UnknownSymbol(entry.symbol.clone()))?;
    let side = Side::parse(&entry.side).ok_or_else(|| MappingError::InvalidSide(entry.side.clone()))?;
    let price = parse_decimal("price", &entry.price)?;
    let size = parse_decimal("size", &entry.size)?;
    let timestamp: DateTime<Utc> = DateTime::from_timestamp_millis(entry.timestamp_ms)
        .ok_or(MappingError::InvalidTimestamp(entry.timestamp_ms))?;

    Ok(Trade {
        id: entry.trade_id.clone(),
        security,
        side,
        price,
        size,
        timestamp,
        is_block_trade: entry.is_block_trade.unwrap_or(false),
    })
}

/// Convert every entry of a batch; entries that fail are logged and skipped.
pub fn trades_from_batch<R>(batch: &TradeBatch, resolve: R) -> Vec<Trade>
where
    R: Fn(&str) -> Option<Security>,
{
    batch
        .data
        .iter()
        .filter_map(|entry| match to_trade(entry, &resolve) {
            Ok(trade) => Some(trade),
            Err(e) => {
                tracing::debug!(topic = %batch.topic, trade_id = %entry.trade_id, error = %e, "Skipping trade");
                None
            }
        })
        .collect()
}

fn parse_decimal(field: &'static str, raw: &str) -> Result<Decimal, MappingError> {
    raw.trim().parse().map_err(|_| MappingError::InvalidNumber {
        field,
        value: raw.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Category;

    fn entry(symbol: &str, side: &str, price: &str) -> TradeDescription {
        TradeDescription {
            trade_id: format!("{symbol}-1"),
            timestamp_ms: 1_672_304_486_865,
            symbol: symbol.into(),
            side: side.into(),
            size: "0.001".into(),
            price: price.into(),
            tick_direction: Some("PlusTick".into()),
            is_block_trade: None,
        }
    }

    fn spot(symbol: &str) -> Option<Security> {
        (symbol != "UNKNOWN").then(|| Security::new(symbol, Category::Spot))
    }

    #[test]
    fn converts_entry() {
        let trade = to_trade(&entry("BTCUSDT", "Buy", "16578.50"), spot).unwrap();

        assert_eq!(trade.security, Security::new("BTCUSDT", Category::Spot));
        assert_eq!(trade.side, Side::Buy);
        assert_eq!(trade.price, "16578.50".parse::<Decimal>().unwrap());
        assert_eq!(trade.size, "0.001".parse::<Decimal>().unwrap());
        assert_eq!(trade.timestamp.timestamp_millis(), 1_672_304_486_865);
        assert!(!trade.is_block_trade);
    }

    #[test]
    fn reports_first_bad_field() {
        assert_eq!(
            to_trade(&entry("UNKNOWN", "Buy", "1"), spot),
            Err(MappingError::UnknownSymbol("UNKNOWN".into()))
        );
        assert_eq!(
            to_trade(&entry("BTCUSDT", "Hold", "1"), spot),
            Err(MappingError::InvalidSide("Hold".into()))
        );
        assert!(matches!(
            to_trade(&entry("BTCUSDT", "Sell", "n/a"), spot),
            Err(MappingError::InvalidNumber { field: "price", .. })
        ));
    }

    #[test]
    fn batch_keeps_every_convertible_entry() {
        let batch = TradeBatch {
            topic: "publicTrade.BTCUSDT".into(),
            kind: "snapshot".into(),
            ts: 1,
            cs: None,
            data: vec![
                entry("BTCUSDT", "Buy", "1"),
                entry("UNKNOWN", "Buy", "1"),
                entry("BTCUSDT", "Sell", "2"),
            ],
        };

        let trades = trades_from_batch(&batch, spot);

        assert_eq!(trades.len(), 2);
        assert_eq!(trades[1].side, Side::Sell);
    }
}
