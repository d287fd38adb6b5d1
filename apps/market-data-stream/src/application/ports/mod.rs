//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: duplex message socket owned by the connection engine
//! - `HeartbeatProvider`: keep-alive message source and reply predicate
//! - `SecurityCatalog`: listing of tradable securities

mod catalog_port;
mod heartbeat_port;
mod transport_port;

pub use catalog_port::{CatalogError, SecurityCatalog, StaticCatalog};
pub use heartbeat_port::{HeartbeatProvider, NoOpHeartbeat};
pub use transport_port::{Frame, Transport, TransportError, TransportState};

#[cfg(test)]
pub use heartbeat_port::MockHeartbeatProvider;
#[cfg(test)]
pub use transport_port::MockTransport;
