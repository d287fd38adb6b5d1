#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::future_not_send
    )
)]

//! Market Data Stream - Self-healing Bybit WebSocket client
//!
//! Keeps one connection to Bybit's v5 public stream alive, correlates
//! subscription requests with their acknowledgements and routes trade and
//! ticker pushes to typed consumers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: connection parameters and state, securities and trades,
//!   the reference-data cache
//!
//! - **Application**: port definitions
//!   - `Transport`: duplex frame socket
//!   - `HeartbeatProvider`: keep-alive messages
//!   - `SecurityCatalog`: tradable security listings
//!
//! - **Infrastructure**: adapters and the connection engine
//!   - `connection`: state machine, receive loop, heartbeat scheduler
//!   - `bybit`: wire messages, router, correlator, provider facade
//!   - `websocket`: tokio-tungstenite transport
//!   - `rest`: REST security catalog
//!   - `config`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! Bybit WS ──► Transport ──► ConnectionEngine ──► MessageRouter ──┬─► RequestCorrelator (acks)
//!                  ▲              │ (heartbeat                     ├─► trades()          (Trade)
//!                  │              │  replies dropped)              └─► ticker_updates()  (TickerUpdate)
//!                  └── pings ◄────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cache::Cache;
pub use domain::connection::{
    ConfigurationError, ConnectionParameters, ConnectionState, MIN_RECONNECTION_DELAY,
    ReconnectionAttempts,
};
pub use domain::market::{Category, Security, SecurityFilter, Side, Trade};

// Ports
pub use application::ports::{
    CatalogError, Frame, HeartbeatProvider, NoOpHeartbeat, SecurityCatalog, StaticCatalog,
    Transport, TransportError, TransportState,
};

// Connection engine
pub use infrastructure::connection::{
    AbortReason, ConnectionEngine, ConnectionError, Deadline, SendError,
};

// Bybit protocol and facade
pub use infrastructure::bybit::{
    BybitHeartbeat, CorrelationError, FrameKind, MarketDataProvider, MessageRouter,
    ProviderError, RequestCorrelator, StreamRequestFactory, TickerUpdate,
};

// Adapters
pub use infrastructure::rest::BybitRestCatalog;
pub use infrastructure::websocket::TungsteniteTransport;

// Config
pub use infrastructure::config::{ClientConfig, ConfigError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
