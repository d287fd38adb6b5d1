//! Message Routing Integration Tests
//!
//! Exercises the market data provider end to end over a scripted transport:
//! acknowledged subscriptions, typed trade and ticker delivery, and the
//! bookkeeping that keeps the router free of stale listeners.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use common::{ScriptedTransport, ack_for, quiet_parameters, settle, trade_frame};
use market_data_stream::{
    Category, ConnectionState, CorrelationError, FrameKind, MarketDataProvider, ProviderError,
    Security, Side, StaticCatalog, TransportError,
};

async fn connected(transport: &ScriptedTransport) -> MarketDataProvider<ScriptedTransport> {
    let provider = MarketDataProvider::new(transport.clone(), Arc::new(StaticCatalog::new(vec![])))
        .with_correlation_timeout(Duration::from_secs(5));
    provider
        .connect(quiet_parameters(), &CancellationToken::new())
        .await
        .unwrap();
    provider
}

fn btc() -> Security {
    Security::new("BTCUSDT", Category::Spot)
}

fn ack_listeners(provider: &MarketDataProvider<ScriptedTransport>) -> usize {
    provider.engine().router().listener_count(FrameKind::Ack)
}

// =============================================================================
// Subscriptions
// =============================================================================

#[tokio::test(start_paused = true)]
async fn subscribe_sends_topic_and_waits_for_ack() {
    let transport = ScriptedTransport::new();
    transport.acknowledging();
    let provider = connected(&transport).await;

    provider.subscribe_trades(&btc()).await.unwrap();
    provider.subscribe_ticker_updates(&btc()).await.unwrap();

    let requests = transport.sent_with_op("subscribe");
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0]["args"], json!(["publicTrade.BTCUSDT"]));
    assert_eq!(requests[1]["args"], json!(["tickers.BTCUSDT"]));
    assert_ne!(requests[0]["req_id"], requests[1]["req_id"]);
    assert_eq!(provider.trade_subscriptions(), [btc()]);
    assert_eq!(provider.ticker_subscriptions(), [btc()]);
    assert_eq!(ack_listeners(&provider), 0);
}

#[tokio::test(start_paused = true)]
async fn rejected_subscription_is_rolled_back() {
    let transport = ScriptedTransport::new();
    transport.respond_with(|frame| ack_for(frame, false, "Invalid symbol :[publicTrade.NOPE]"));
    let provider = connected(&transport).await;

    let err = provider
        .subscribe_trades(&Security::new("NOPE", Category::Spot))
        .await
        .unwrap_err();

    assert!(matches!(err, ProviderError::Rejected(ref msg) if msg.contains("Invalid symbol")));
    assert!(provider.trade_subscriptions().is_empty());
    assert_eq!(ack_listeners(&provider), 0);
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_subscription_times_out() {
    let transport = ScriptedTransport::new();
    let provider = connected(&transport).await;

    let err = provider.subscribe_trades(&btc()).await.unwrap_err();

    assert!(matches!(
        err,
        ProviderError::Correlation(CorrelationError::TimedOut { .. })
    ));
    assert!(provider.trade_subscriptions().is_empty());
    assert_eq!(ack_listeners(&provider), 0);
    assert_eq!(provider.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn concurrent_subscriptions_each_complete_once() {
    let transport = ScriptedTransport::new();
    transport.acknowledging();
    let provider = connected(&transport).await;
    let eth = Security::new("ETHUSDT", Category::Spot);
    let btc_security = btc();

    let (a, b) = tokio::join!(provider.subscribe_trades(&btc_security), provider.subscribe_trades(&eth));

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(provider.trade_subscriptions(), [btc(), eth]);
    assert_eq!(ack_listeners(&provider), 0);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_removes_from_book() {
    let transport = ScriptedTransport::new();
    transport.acknowledging();
    let provider = connected(&transport).await;

    provider.subscribe_trades(&btc()).await.unwrap();
    provider.unsubscribe_trades(&btc()).await.unwrap();

    let requests = transport.sent_with_op("unsubscribe");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["args"], json!(["publicTrade.BTCUSDT"]));
    assert!(provider.trade_subscriptions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn subscribe_after_disconnect_fails_fast() {
    let transport = ScriptedTransport::new();
    transport.acknowledging();
    let provider = connected(&transport).await;
    provider.disconnect(&CancellationToken::new()).await;

    let err = provider.subscribe_trades(&btc()).await.unwrap_err();

    assert!(matches!(err, ProviderError::NotConnected));
    assert!(transport.sent_with_op("subscribe").is_empty());
}

#[tokio::test(start_paused = true)]
async fn subscriptions_are_replayed_after_reconnect() {
    let transport = ScriptedTransport::new();
    transport.acknowledging();
    let provider = connected(&transport).await;
    let mut trades = provider.trades();
    provider.subscribe_trades(&btc()).await.unwrap();
    provider.subscribe_ticker_updates(&btc()).await.unwrap();

    transport.push_error(TransportError::Socket("connection reset".into()));
    settle().await;

    assert_eq!(transport.connect_count(), 2);
    assert_eq!(provider.state(), ConnectionState::Connected);
    let topics: Vec<_> = transport
        .sent_with_op("subscribe")
        .into_iter()
        .map(|request| request["args"].clone())
        .collect();
    assert_eq!(
        topics,
        [
            json!(["publicTrade.BTCUSDT"]),
            json!(["tickers.BTCUSDT"]),
            json!(["publicTrade.BTCUSDT"]),
            json!(["tickers.BTCUSDT"]),
        ]
    );
    assert_eq!(provider.trade_subscriptions(), [btc()]);
    assert_eq!(ack_listeners(&provider), 0);

    transport.push(trade_frame("BTCUSDT", "after-reconnect", "16600"));
    settle().await;
    assert_eq!(trades.try_recv().unwrap().id, "after-reconnect");
}

#[tokio::test(start_paused = true)]
async fn replay_rejection_drops_the_subscription() {
    let transport = ScriptedTransport::new();
    transport.acknowledging();
    let provider = connected(&transport).await;
    provider.subscribe_trades(&btc()).await.unwrap();

    transport.respond_with(|frame| ack_for(frame, false, "Invalid symbol :[publicTrade.BTCUSDT]"));
    transport.push_error(TransportError::Socket("connection reset".into()));
    settle().await;

    assert_eq!(transport.sent_with_op("subscribe").len(), 2);
    assert!(provider.trade_subscriptions().is_empty());
    assert_eq!(provider.state(), ConnectionState::Connected);
}

// =============================================================================
// Delivery
// =============================================================================

#[tokio::test(start_paused = true)]
async fn trades_are_converted_for_subscribed_symbols() {
    let transport = ScriptedTransport::new();
    transport.acknowledging();
    let provider = connected(&transport).await;
    let mut trades = provider.trades();

    provider.subscribe_trades(&btc()).await.unwrap();
    transport.push(trade_frame("ETHUSDT", "eth-1", "1200.10"));
    transport.push(trade_frame("BTCUSDT", "btc-1", "16578.50"));
    settle().await;

    let trade = trades.try_recv().unwrap();
    assert_eq!(trade.id, "btc-1");
    assert_eq!(trade.security, btc());
    assert_eq!(trade.side, Side::Buy);
    assert_eq!(trade.price, "16578.50".parse::<Decimal>().unwrap());
    assert_eq!(trade.timestamp.timestamp_millis(), 1_672_304_486_865);
    assert!(trades.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn every_entry_of_a_batch_is_delivered() {
    let transport = ScriptedTransport::new();
    transport.acknowledging();
    let provider = connected(&transport).await;
    let mut trades = provider.trades();
    provider.subscribe_trades(&btc()).await.unwrap();

    transport.push(json!({
        "topic": "publicTrade.BTCUSDT",
        "type": "snapshot",
        "ts": 1_672_304_486_868_i64,
        "data": [
            {"T": 1_672_304_486_865_i64, "s": "BTCUSDT", "S": "Buy", "v": "0.001", "p": "16578.50", "i": "a"},
            {"T": 1_672_304_486_866_i64, "s": "BTCUSDT", "S": "Sell", "v": "0.002", "p": "16578.00", "i": "b"}
        ]
    }));
    settle().await;

    let ids: Vec<String> = std::iter::from_fn(|| trades.try_recv().ok())
        .map(|t| t.id)
        .collect();
    assert_eq!(ids, ["a", "b"]);
}

#[tokio::test(start_paused = true)]
async fn ticker_updates_accept_object_payloads() {
    let transport = ScriptedTransport::new();
    transport.acknowledging();
    let provider = connected(&transport).await;
    let mut updates = provider.ticker_updates();
    provider.subscribe_ticker_updates(&btc()).await.unwrap();

    transport.push(json!({
        "topic": "tickers.BTCUSDT",
        "type": "snapshot",
        "ts": 1_673_853_746_003_i64,
        "cs": 2_588_407_389_i64,
        "data": {
            "symbol": "BTCUSDT",
            "lastPrice": "21109.77",
            "highPrice24h": "21426.99",
            "volume24h": "6780.866843"
        }
    }));
    settle().await;

    let update = updates.try_recv().unwrap();
    assert_eq!(update.symbol, "BTCUSDT");
    assert_eq!(update.last_price, Some("21109.77".parse().unwrap()));
    assert_eq!(update.ask1_price, None);
}

#[tokio::test(start_paused = true)]
async fn garbage_between_frames_is_skipped() {
    let transport = ScriptedTransport::new();
    transport.acknowledging();
    let provider = connected(&transport).await;
    let mut trades = provider.trades();
    provider.subscribe_trades(&btc()).await.unwrap();

    transport.push(json!({"topic": "publicTrade.BTCUSDT", "type": "snapshot", "ts": 1, "data": "oops"}));
    transport.push(json!({"hello": "world"}));
    transport.push(trade_frame("BTCUSDT", "after-garbage", "1"));
    settle().await;

    assert_eq!(trades.try_recv().unwrap().id, "after-garbage");
    assert_eq!(provider.state(), ConnectionState::Connected);
}
