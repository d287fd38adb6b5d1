//! Market Domain Types
//!
//! Codec-agnostic representations of tradable securities and executed trades.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Product category of a security.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Spot pairs.
    Spot,
    /// USDT/USDC margined perpetuals and futures.
    Linear,
    /// Coin margined perpetuals and futures.
    Inverse,
    /// Options.
    Option,
}

impl Category {
    /// Get the category name used on the wire.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Linear => "linear",
            Self::Inverse => "inverse",
            Self::Option => "option",
        }
    }

    /// Parse category from string.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "spot" => Some(Self::Spot),
            "linear" => Some(Self::Linear),
            "inverse" => Some(Self::Inverse),
            "option" => Some(Self::Option),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tradable instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Security {
    /// Exchange ticker, e.g. `BTCUSDT`.
    pub ticker: String,
    /// Product category.
    pub category: Category,
}

impl Security {
    /// Create a new security.
    #[must_use]
    pub fn new(ticker: impl Into<String>, category: Category) -> Self {
        Self {
            ticker: ticker.into(),
            category,
        }
    }
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.category, self.ticker)
    }
}

/// Criteria for listing available securities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityFilter {
    /// Category to list.
    pub category: Category,
    /// Case-insensitive substring the ticker must contain.
    pub ticker_template: Option<String>,
}

impl SecurityFilter {
    /// List every security of a category.
    #[must_use]
    pub const fn category(category: Category) -> Self {
        Self {
            category,
            ticker_template: None,
        }
    }

    /// Restrict to tickers containing `template`.
    #[must_use]
    pub fn with_ticker_template(mut self, template: impl Into<String>) -> Self {
        self.ticker_template = Some(template.into());
        self
    }

    /// Check whether a security passes the filter.
    #[must_use]
    pub fn matches(&self, security: &Security) -> bool {
        if security.category != self.category {
            return false;
        }

        self.ticker_template.as_ref().is_none_or(|template| {
            security
                .ticker
                .to_lowercase()
                .contains(&template.to_lowercase())
        })
    }
}

/// Taker side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Taker bought.
    Buy,
    /// Taker sold.
    Sell,
}

impl Side {
    /// Parse the side as sent by the exchange (`Buy` / `Sell`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("buy") {
            Some(Self::Buy)
        } else if s.eq_ignore_ascii_case("sell") {
            Some(Self::Sell)
        } else {
            None
        }
    }
}

/// An executed public trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Exchange trade id.
    pub id: String,
    /// Traded security.
    pub security: Security,
    /// Taker side.
    pub side: Side,
    /// Execution price.
    pub price: Decimal,
    /// Executed quantity.
    pub size: Decimal,
    /// Fill time.
    pub timestamp: DateTime<Utc>,
    /// Block trade flag.
    pub is_block_trade: bool,
}

impl fmt::Display for Trade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:?} {} x {}",
            self.timestamp.to_rfc3339(),
            self.security,
            self.side,
            self.size,
            self.price
        )
    }
}
