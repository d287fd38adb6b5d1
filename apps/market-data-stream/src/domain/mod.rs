//! Domain Layer - Core connection and market data types.
//!
//! This layer contains the core domain types with no I/O. Everything here is
//! plain Rust with serialization support.

/// Connection parameters, validation and lifecycle state.
pub mod connection;

/// Securities, trades and listing filters.
pub mod market;

/// Keyed snapshot cache with staleness tracking.
pub mod cache;
