//! Transport Port
//!
//! Interface over a raw duplex message socket. The connection engine owns
//! exactly one transport and never assumes anything about the concrete socket
//! library behind it.
//!
//! Operations do not take deadlines themselves; callers bound them by racing
//! the returned future against a [`Deadline`](crate::infrastructure::connection::Deadline)
//! and dropping it on expiry, so implementations must be cancel-safe at every
//! `.await`.

use async_trait::async_trait;

/// Connectivity of a transport as it reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportState {
    /// No socket, or the socket was closed.
    #[default]
    Closed,
    /// Opening handshake in progress.
    Connecting,
    /// Socket usable for send and receive.
    Open,
    /// Close handshake in progress.
    Closing,
    /// Socket torn down without a close handshake.
    Aborted,
}

impl TransportState {
    /// Whether the transport can carry frames.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// One discrete message on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
}

impl Frame {
    /// Borrow the payload as text, if it is valid UTF-8.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(bytes) => std::str::from_utf8(bytes).ok(),
        }
    }
}

/// Transport-level failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Operation requires an open socket.
    #[error("transport is not connected")]
    NotConnected,

    /// Peer closed the connection or the stream ended.
    #[error("connection closed{}", .reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    Closed {
        /// Close reason sent by the peer, if any.
        reason: Option<String>,
    },

    /// Underlying socket failure.
    #[error("socket error: {0}")]
    Socket(String),

    /// A frame arrived that the transport could not hand over.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),
}

impl TransportError {
    /// Whether the socket itself is broken, as opposed to a single bad frame.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        !matches!(self, Self::InvalidFrame(_))
    }
}

/// Port for a duplex message socket.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Current connectivity.
    fn state(&self) -> TransportState;

    /// Open a connection to `url`, replacing any previous socket.
    async fn connect(&self, url: &str) -> Result<(), TransportError>;

    /// Send one frame.
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;

    /// Wait for the next data frame.
    async fn receive(&self) -> Result<Frame, TransportError>;

    /// Perform the close handshake with a normal-closure status.
    async fn close(&self, reason: &str) -> Result<(), TransportError>;

    /// Tear the socket down immediately.
    fn abort(&self);
}
