//! Market Data Provider
//!
//! The public face of the client. Composes the connection engine, the message
//! router and the request correlator over one transport, and adds:
//!
//! - topic subscriptions confirmed by acknowledgement
//! - typed trade and ticker streams
//! - a cached catalog of tradable securities per category
//!
//! # Subscription Book
//!
//! Trade pushes carry only a symbol. The book maps each subscribed ticker to
//! its [`Security`] so trades can be resolved without a catalog round trip.
//! Entries are added before the subscribe request goes out (so pushes racing
//! the ack resolve) and rolled back if the request fails.
//!
//! The exchange forgets subscriptions when the socket drops. Every return to
//! `Connected` after the first replays the book; entries the exchange then
//! rejects are removed, other failures keep the entry for the next replay.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use super::correlator::{CorrelationError, RequestCorrelator};
use super::heartbeat::BybitHeartbeat;
use super::mapping::trades_from_batch;
use super::messages::{OutboundRequest, TickerUpdate};
use super::requests::{StreamRequestFactory, ticker_topic, trade_topic};
use super::router::{MessageRouter, Subscription};
use crate::application::ports::{CatalogError, SecurityCatalog, Transport};
use crate::domain::cache::{Cache, DEFAULT_UPDATE_PERIOD};
use crate::domain::connection::{ConnectionParameters, ConnectionState};
use crate::domain::market::{Category, Security, SecurityFilter, Trade};
use crate::infrastructure::connection::{ConnectionEngine, ConnectionError};

const EVENT_CHANNEL_CAPACITY: usize = 4096;

// =============================================================================
// Errors
// =============================================================================

/// Provider operation failures.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The operation needs an established connection.
    #[error("not connected to the stream")]
    NotConnected,

    /// The exchange answered with `success: false`.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The request was not acknowledged.
    #[error(transparent)]
    Correlation(#[from] CorrelationError),

    /// The catalog could not be read.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

// =============================================================================
// Subscription Book
// =============================================================================

#[derive(Debug, Default)]
struct SubscriptionBook {
    trades: HashMap<String, Security>,
    tickers: HashMap<String, Security>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Trades,
    Tickers,
}

impl Channel {
    fn topic(self, ticker: &str) -> String {
        match self {
            Self::Trades => trade_topic(ticker),
            Self::Tickers => ticker_topic(ticker),
        }
    }
}

impl SubscriptionBook {
    fn entries(&mut self, channel: Channel) -> &mut HashMap<String, Security> {
        match channel {
            Channel::Trades => &mut self.trades,
            Channel::Tickers => &mut self.tickers,
        }
    }

    fn tickers(&self, channel: Channel) -> Vec<String> {
        let entries = match channel {
            Channel::Trades => &self.trades,
            Channel::Tickers => &self.tickers,
        };
        let mut tickers: Vec<String> = entries.keys().cloned().collect();
        tickers.sort();
        tickers
    }

    fn sorted(entries: &HashMap<String, Security>) -> Vec<Security> {
        let mut securities: Vec<Security> = entries.values().cloned().collect();
        securities.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        securities
    }
}

async fn acknowledge<T: Transport>(
    correlator: &RequestCorrelator,
    engine: &ConnectionEngine<T>,
    request: OutboundRequest,
) -> Result<(), ProviderError> {
    let ack = correlator.request(engine, request).await?;
    if ack.success {
        Ok(())
    } else {
        Err(ProviderError::Rejected(ack.ret_msg.unwrap_or_default()))
    }
}

// =============================================================================
// Resubscription
// =============================================================================

/// Background task that replays the book after each reconnect.
struct Resubscriber<T: Transport> {
    engine: ConnectionEngine<T>,
    correlator: RequestCorrelator,
    requests: Arc<StreamRequestFactory>,
    book: Arc<RwLock<SubscriptionBook>>,
}

impl<T: Transport> Resubscriber<T> {
    async fn run(self, mut states: broadcast::Receiver<ConnectionState>, stop: CancellationToken) {
        let mut connected_before = false;
        loop {
            let state = tokio::select! {
                () = stop.cancelled() => return,
                state = states.recv() => state,
            };

            match state {
                Ok(ConnectionState::Connected) => {
                    if connected_before {
                        tokio::select! {
                            () = stop.cancelled() => return,
                            () = self.replay() => {}
                        }
                    }
                    connected_before = true;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Missed connection state changes");
                }
                Err(RecvError::Closed) => return,
            }
        }
    }

    async fn replay(&self) {
        for channel in [Channel::Trades, Channel::Tickers] {
            let tickers = self.book.read().tickers(channel);
            for ticker in tickers {
                let request = self.requests.subscribe([channel.topic(&ticker)]);
                match acknowledge(&self.correlator, &self.engine, request).await {
                    Ok(()) => tracing::info!(ticker = %ticker, channel = ?channel, "Resubscribed"),
                    Err(ProviderError::Rejected(reason)) => {
                        self.book.write().entries(channel).remove(&ticker);
                        tracing::warn!(ticker = %ticker, channel = ?channel, reason = %reason, "Resubscribe rejected");
                    }
                    Err(e) => {
                        tracing::warn!(ticker = %ticker, channel = ?channel, error = %e, "Resubscribe failed");
                    }
                }
            }
        }
    }
}

// =============================================================================
// Provider
// =============================================================================

/// Bybit public market data over one WebSocket connection.
pub struct MarketDataProvider<T: Transport> {
    engine: ConnectionEngine<T>,
    correlator: RequestCorrelator,
    requests: Arc<StreamRequestFactory>,
    catalog: Arc<dyn SecurityCatalog>,
    caches: Mutex<HashMap<Category, Cache<Security>>>,
    catalog_ttl: TimeDelta,
    book: Arc<RwLock<SubscriptionBook>>,
    trades_tx: broadcast::Sender<Trade>,
    tickers_tx: broadcast::Sender<TickerUpdate>,
    resubscriber: Mutex<Option<CancellationToken>>,
    _listeners: Vec<Subscription>,
}

impl<T: Transport> std::fmt::Debug for MarketDataProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataProvider")
            .field("engine", &self.engine)
            .field("catalog_ttl", &self.catalog_ttl)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> MarketDataProvider<T> {
    /// Build a provider over `transport`, listing securities from `catalog`.
    #[must_use]
    pub fn new(transport: T, catalog: Arc<dyn SecurityCatalog>) -> Self {
        let router = Arc::new(MessageRouter::new());
        let requests = Arc::new(StreamRequestFactory::new());
        let heartbeat = Arc::new(BybitHeartbeat::new(Arc::clone(&requests)));
        let engine = ConnectionEngine::new(transport, heartbeat, Arc::clone(&router));

        let book = Arc::new(RwLock::new(SubscriptionBook::default()));
        let (trades_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (tickers_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let trade_listener = {
            let book = Arc::clone(&book);
            let trades_tx = trades_tx.clone();
            router.on_trades(move |batch| {
                let trades = {
                    let book = book.read();
                    trades_from_batch(batch, |symbol| book.trades.get(symbol).cloned())
                };
                for trade in trades {
                    // No receivers is fine.
                    let _ = trades_tx.send(trade);
                }
            })
        };

        let ticker_listener = {
            let tickers_tx = tickers_tx.clone();
            router.on_ticker_updates(move |batch| {
                for update in &batch.data {
                    let _ = tickers_tx.send(update.clone());
                }
            })
        };

        Self {
            engine,
            correlator: RequestCorrelator::new(router),
            requests,
            catalog,
            caches: Mutex::new(HashMap::new()),
            catalog_ttl: DEFAULT_UPDATE_PERIOD,
            book,
            trades_tx,
            tickers_tx,
            resubscriber: Mutex::new(None),
            _listeners: vec![trade_listener, ticker_listener],
        }
    }

    /// Override how long subscribe and unsubscribe wait for an acknowledgement.
    #[must_use]
    pub fn with_correlation_timeout(mut self, timeout: Duration) -> Self {
        self.correlator = self.correlator.clone().with_timeout(timeout);
        self
    }

    /// Override how long a catalog listing stays fresh.
    #[must_use]
    pub fn with_catalog_ttl(mut self, ttl: TimeDelta) -> Self {
        self.catalog_ttl = ttl;
        self
    }

    /// Underlying connection engine.
    #[must_use]
    pub const fn engine(&self) -> &ConnectionEngine<T> {
        &self.engine
    }

    // -------------------------------------------------------------------------
    // Connection
    // -------------------------------------------------------------------------

    /// See [`ConnectionEngine::connect`]. Subscriptions are replayed on every
    /// later return to `Connected`.
    ///
    /// # Errors
    ///
    /// Propagates [`ConnectionError`].
    pub async fn connect(
        &self,
        parameters: ConnectionParameters,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        self.watch_reconnects();
        self.engine.connect(parameters, cancel).await
    }

    fn watch_reconnects(&self) {
        let mut slot = self.resubscriber.lock();
        if slot.is_some() || self.engine.is_disposed() {
            return;
        }

        let stop = CancellationToken::new();
        let resubscriber = Resubscriber {
            engine: self.engine.clone(),
            correlator: self.correlator.clone(),
            requests: Arc::clone(&self.requests),
            book: Arc::clone(&self.book),
        };
        tokio::spawn(resubscriber.run(self.engine.state_changes(), stop.clone()));
        *slot = Some(stop);
    }

    fn stop_watching(&self) {
        if let Some(stop) = self.resubscriber.lock().take() {
            stop.cancel();
        }
    }

    /// See [`ConnectionEngine::disconnect`].
    pub async fn disconnect(&self, cancel: &CancellationToken) {
        self.engine.disconnect(cancel).await;
    }

    /// See [`ConnectionEngine::dispose`].
    pub fn dispose(&self) {
        self.engine.dispose();
        self.stop_watching();
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.engine.state()
    }

    /// Connection state changes.
    #[must_use]
    pub fn state_changes(&self) -> broadcast::Receiver<ConnectionState> {
        self.engine.state_changes()
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Start receiving trades of `security` on [`trades`](Self::trades).
    ///
    /// # Errors
    ///
    /// [`ProviderError::NotConnected`] unless connected,
    /// [`ProviderError::Rejected`] on a negative acknowledgement, and
    /// [`ProviderError::Correlation`] when no acknowledgement arrives.
    pub async fn subscribe_trades(&self, security: &Security) -> Result<(), ProviderError> {
        self.subscribe(Channel::Trades, security).await
    }

    /// Stop receiving trades of `security`.
    ///
    /// # Errors
    ///
    /// As for [`subscribe_trades`](Self::subscribe_trades).
    pub async fn unsubscribe_trades(&self, security: &Security) -> Result<(), ProviderError> {
        self.unsubscribe(Channel::Trades, security).await
    }

    /// Start receiving ticker updates of `security` on
    /// [`ticker_updates`](Self::ticker_updates).
    ///
    /// # Errors
    ///
    /// As for [`subscribe_trades`](Self::subscribe_trades).
    pub async fn subscribe_ticker_updates(&self, security: &Security) -> Result<(), ProviderError> {
        self.subscribe(Channel::Tickers, security).await
    }

    /// Stop receiving ticker updates of `security`.
    ///
    /// # Errors
    ///
    /// As for [`subscribe_trades`](Self::subscribe_trades).
    pub async fn unsubscribe_ticker_updates(&self, security: &Security) -> Result<(), ProviderError> {
        self.unsubscribe(Channel::Tickers, security).await
    }

    /// Securities with an active trade subscription, by ticker.
    #[must_use]
    pub fn trade_subscriptions(&self) -> Vec<Security> {
        SubscriptionBook::sorted(&self.book.read().trades)
    }

    /// Securities with an active ticker subscription, by ticker.
    #[must_use]
    pub fn ticker_subscriptions(&self) -> Vec<Security> {
        SubscriptionBook::sorted(&self.book.read().tickers)
    }

    /// Trades of subscribed securities.
    #[must_use]
    pub fn trades(&self) -> broadcast::Receiver<Trade> {
        self.trades_tx.subscribe()
    }

    /// Ticker updates of subscribed securities.
    #[must_use]
    pub fn ticker_updates(&self) -> broadcast::Receiver<TickerUpdate> {
        self.tickers_tx.subscribe()
    }

    async fn subscribe(&self, channel: Channel, security: &Security) -> Result<(), ProviderError> {
        self.ensure_connected()?;

        let ticker = security.ticker.clone();
        let previous = self
            .book
            .write()
            .entries(channel)
            .insert(ticker.clone(), security.clone());

        let request = self.requests.subscribe([channel.topic(&ticker)]);
        let result = self.correlate(request).await;

        if let Err(e) = &result {
            let mut book = self.book.write();
            let entries = book.entries(channel);
            match previous {
                Some(previous) => entries.insert(ticker.clone(), previous),
                None => entries.remove(&ticker),
            };
            tracing::warn!(ticker = %ticker, channel = ?channel, error = %e, "Subscribe failed");
        } else {
            tracing::info!(security = %security, channel = ?channel, "Subscribed");
        }
        result
    }

    async fn unsubscribe(&self, channel: Channel, security: &Security) -> Result<(), ProviderError> {
        self.ensure_connected()?;

        let request = self.requests.unsubscribe([channel.topic(&security.ticker)]);
        self.correlate(request).await?;

        self.book.write().entries(channel).remove(&security.ticker);
        tracing::info!(security = %security, channel = ?channel, "Unsubscribed");
        Ok(())
    }

    async fn correlate(&self, request: OutboundRequest) -> Result<(), ProviderError> {
        acknowledge(&self.correlator, &self.engine, request).await
    }

    fn ensure_connected(&self) -> Result<(), ProviderError> {
        if self.engine.state() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(ProviderError::NotConnected)
        }
    }

    // -------------------------------------------------------------------------
    // Catalog
    // -------------------------------------------------------------------------

    /// Securities matching `filter`, sorted by ticker.
    ///
    /// Served from the category cache while it is fresh; otherwise the
    /// catalog is queried and the cache replaced.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Catalog`] when the catalog has to be queried and fails.
    pub async fn available_securities(
        &self,
        filter: &SecurityFilter,
    ) -> Result<Vec<Security>, ProviderError> {
        let category = filter.category;
        let cached: Option<Vec<Security>> = {
            let caches = self.caches.lock();
            caches
                .get(&category)
                .filter(|cache| !cache.is_stale())
                .map(|cache| cache.items().cloned().collect())
        };

        let securities = if let Some(securities) = cached {
            tracing::debug!(category = %category, count = securities.len(), "Catalog cache hit");
            securities
        } else {
            let fetched = self.catalog.securities(category).await?;
            self.caches
                .lock()
                .entry(category)
                .or_insert_with(|| Cache::new(self.catalog_ttl))
                .update(fetched.iter().cloned(), |s| s.ticker.clone());
            fetched
        };

        let mut matched: Vec<Security> = securities
            .into_iter()
            .filter(|s| filter.matches(s))
            .collect();
        matched.sort_by(|a, b| a.ticker.cmp(&b.ticker));
        Ok(matched)
    }
}

impl<T: Transport> Drop for MarketDataProvider<T> {
    fn drop(&mut self) {
        self.dispose();
    }
}
