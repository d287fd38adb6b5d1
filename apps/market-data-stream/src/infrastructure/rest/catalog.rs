//! Bybit REST Security Catalog
//!
//! Lists tradable securities from the public market endpoint:
//!
//! ```text
//! GET {base}/v5/market/tickers?category=spot
//! ```
//!
//! # Response (JSON)
//! ```json
//! {
//!   "retCode": 0,
//!   "retMsg": "OK",
//!   "result": {"category": "spot", "list": [{"symbol": "BTCUSDT", "lastPrice": "21109.77"}]}
//! }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::application::ports::{CatalogError, SecurityCatalog};
use crate::domain::market::{Category, Security};

/// Production REST host.
pub const DEFAULT_BASE_URL: &str = "https://api.bybit.com";

const TICKERS_PATH: &str = "v5/market/tickers";

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response<T> {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TickerList {
    #[serde(default)]
    list: Vec<TickerEntry>,
}

#[derive(Debug, Deserialize)]
struct TickerEntry {
    symbol: String,
}

// =============================================================================
// Adapter
// =============================================================================

/// [`SecurityCatalog`] backed by the Bybit REST API.
#[derive(Debug, Clone)]
pub struct BybitRestCatalog {
    client: reqwest::Client,
    base_url: String,
}

impl BybitRestCatalog {
    /// Create a catalog for `base_url` with a request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Request`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CatalogError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CatalogError::Request {
                message: e.to_string(),
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
        })
    }

    /// Base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn tickers_url(&self) -> String {
        format!("{}/{TICKERS_PATH}", self.base_url)
    }
}

#[async_trait]
impl SecurityCatalog for BybitRestCatalog {
    async fn securities(&self, category: Category) -> Result<Vec<Security>, CatalogError> {
        let url = self.tickers_url();
        tracing::debug!(url = %url, category = %category, "Fetching securities");

        let response = self
            .client
            .get(&url)
            .query(&[("category", category.as_str())])
            .send()
            .await
            .map_err(|e| CatalogError::Request {
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CatalogError::Status {
                status: status.as_u16(),
            });
        }

        let body: Response<TickerList> =
            response.json().await.map_err(|e| CatalogError::Decode {
                message: e.to_string(),
            })?;

        if body.ret_code != 0 {
            return Err(CatalogError::Rejected {
                code: body.ret_code,
                message: body.ret_msg,
            });
        }

        let securities: Vec<Security> = body
            .result
            .map(|r| r.list)
            .unwrap_or_default()
            .into_iter()
            .map(|entry| Security::new(entry.symbol, category))
            .collect();

        tracing::info!(category = %category, count = securities.len(), "Fetched securities");
        Ok(securities)
    }
}
