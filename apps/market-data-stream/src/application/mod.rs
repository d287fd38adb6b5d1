//! Application Layer - Port definitions.
//!
//! The contracts the connection engine and the market data provider depend
//! on. Infrastructure adapters implement them.

/// Port interfaces for external systems (transport, heartbeat, catalog).
pub mod ports;
