//! Market Data Stream Binary
//!
//! Connects to the Bybit public stream, subscribes the configured tickers and
//! logs trades until interrupted.
//!
//! # Usage
//!
//! ```bash
//! STREAM_TICKERS=BTCUSDT,ETHUSDT cargo run --bin market-data-stream
//! ```
//!
//! See [`ClientConfig`] for the full list of environment variables. Logging
//! is controlled by `RUST_LOG` and `OTEL_*`.

use std::sync::Arc;
use std::time::Duration;

use market_data_stream::infrastructure::telemetry;
use market_data_stream::{
    BybitRestCatalog, ClientConfig, ConnectionError, MarketDataProvider, SecurityFilter,
    TungsteniteTransport, init_metrics,
};
use tokio::signal;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Catalog request timeout.
const REST_TIMEOUT: Duration = Duration::from_secs(10);

type Provider = MarketDataProvider<TungsteniteTransport>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        anyhow::bail!("failed to install rustls crypto provider");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Data Stream");

    let config = ClientConfig::from_env()?;
    log_config(&config);

    if config.metrics_port != 0 {
        match init_metrics(config.metrics_port) {
            Ok(addr) => tracing::info!(addr = %addr, "Prometheus exporter listening"),
            Err(e) => tracing::warn!(error = %e, "Prometheus exporter unavailable"),
        }
    }

    let catalog = Arc::new(BybitRestCatalog::new(
        config.catalog.rest_url.clone(),
        REST_TIMEOUT,
    )?);
    let provider: Arc<Provider> = Arc::new(
        MarketDataProvider::new(TungsteniteTransport::new(), catalog)
            .with_catalog_ttl(config.catalog.ttl),
    );

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));
    tokio::spawn(log_state_changes(provider.state_changes(), shutdown_token.clone()));

    match provider
        .connect(config.stream.connection_parameters(), &shutdown_token)
        .await
    {
        Ok(()) => {}
        Err(ConnectionError::Cancelled { .. }) => {
            provider.dispose();
            return Ok(());
        }
        Err(e) => {
            provider.dispose();
            return Err(e.into());
        }
    }

    if config.catalog.warmup {
        warm_up_catalog(&provider, &config).await;
    }

    let trades_task = tokio::spawn(log_trades(provider.trades(), shutdown_token.clone()));

    for security in config.securities() {
        if let Err(e) = provider.subscribe_trades(&security).await {
            tracing::error!(security = %security, error = %e, "Trade subscription failed");
        }
        if let Err(e) = provider.subscribe_ticker_updates(&security).await {
            tracing::error!(security = %security, error = %e, "Ticker subscription failed");
        }
    }

    shutdown_token.cancelled().await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, provider.disconnect(&CancellationToken::new()))
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Disconnect did not finish in time"
        );
    }
    provider.dispose();
    let _ = trades_task.await;

    tracing::info!("Market Data Stream stopped");
    Ok(())
}

/// List the configured category and warn about tickers it does not contain.
async fn warm_up_catalog(provider: &Provider, config: &ClientConfig) {
    let filter = SecurityFilter::category(config.category);
    match provider.available_securities(&filter).await {
        Ok(securities) => {
            tracing::info!(category = %config.category, count = securities.len(), "Catalog loaded");
            for ticker in &config.tickers {
                if !securities.iter().any(|s| &s.ticker == ticker) {
                    tracing::warn!(ticker = %ticker, category = %config.category, "Ticker not listed");
                }
            }
        }
        Err(e) => tracing::warn!(error = %e, "Catalog warm-up failed"),
    }
}

async fn log_trades(
    mut trades: broadcast::Receiver<market_data_stream::Trade>,
    shutdown_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            received = trades.recv() => match received {
                Ok(trade) => tracing::info!(trade = %trade, "Trade"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Trade log lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

async fn log_state_changes(
    mut states: broadcast::Receiver<market_data_stream::ConnectionState>,
    shutdown_token: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            received = states.recv() => match received {
                Ok(state) => tracing::info!(state = %state, "Connection state changed"),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        stream_url = %config.stream.url,
        category = %config.category,
        tickers = ?config.tickers,
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        reconnection_attempts = ?config.stream.reconnection_attempts,
        reconnection_interval_ms = config.stream.reconnection_interval.as_millis(),
        connection_timeout = ?config.stream.connection_timeout,
        heartbeat_enabled = config.stream.heartbeat_enabled,
        heartbeat_interval_ms = config.stream.heartbeat_interval.as_millis(),
        rest_url = %config.catalog.rest_url,
        "Stream policy"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
