//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the connection engine that drives
//! them.

/// Bybit v5 public stream protocol and market data facade.
pub mod bybit;

/// Connection engine, heartbeat scheduler and deadlines.
pub mod connection;

/// Configuration loaded from the environment.
pub mod config;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// REST security catalog.
pub mod rest;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// tokio-tungstenite transport.
pub mod websocket;
