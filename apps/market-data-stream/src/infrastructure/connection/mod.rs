//! Connection lifecycle: engine, receive loop, heartbeat timer and the
//! deadlines that bound every suspension point.

pub mod deadline;
pub mod engine;
pub mod heartbeat;

pub use deadline::{AbortReason, Deadline};
pub use engine::{ConnectionEngine, ConnectionError, SendError};
pub use heartbeat::HeartbeatScheduler;
