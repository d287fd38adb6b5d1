//! WebSocket transport adapter.

pub mod transport;

pub use transport::TungsteniteTransport;
