//! WebSocket Transport
//!
//! [`Transport`] over tokio-tungstenite. The socket is split so a pending
//! read never blocks a heartbeat send: the write half and the read half sit
//! behind separate async locks.
//!
//! Control frames are handled here. Pings are answered with pongs, pongs are
//! swallowed, and a close frame ends the connection. Only text and binary
//! frames reach the caller.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{Frame, Transport, TransportError, TransportState};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = SplitSink<Socket, Message>;
type Reader = SplitStream<Socket>;

/// tokio-tungstenite backed transport.
#[derive(Default)]
pub struct TungsteniteTransport {
    writer: tokio::sync::Mutex<Option<Writer>>,
    reader: tokio::sync::Mutex<Option<Reader>>,
    state: parking_lot::Mutex<TransportState>,
}

impl std::fmt::Debug for TungsteniteTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TungsteniteTransport")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl TungsteniteTransport {
    /// Create a closed transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set_state(&self, state: TransportState) {
        *self.state.lock() = state;
    }

    fn fail(&self, error: &tokio_tungstenite::tungstenite::Error) -> TransportError {
        self.set_state(TransportState::Aborted);
        TransportError::Socket(error.to_string())
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    async fn connect(&self, url: &str) -> Result<(), TransportError> {
        self.abort();
        self.set_state(TransportState::Connecting);

        let (socket, response) = match tokio_tungstenite::connect_async(url).await {
            Ok(connected) => connected,
            Err(e) => return Err(self.fail(&e)),
        };
        tracing::debug!(url, status = %response.status(), "WebSocket handshake complete");

        let (write, read) = socket.split();
        *self.writer.lock().await = Some(write);
        *self.reader.lock().await = Some(read);
        self.set_state(TransportState::Open);
        Ok(())
    }

    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(bytes) => Message::Binary(bytes.into()),
        };

        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        sink.send(message).await.map_err(|e| self.fail(&e))
    }

    async fn receive(&self) -> Result<Frame, TransportError> {
        let mut reader = self.reader.lock().await;
        let Some(stream) = reader.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Frame::Text(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bytes))) => return Ok(Frame::Binary(bytes.to_vec())),
                Some(Ok(Message::Ping(payload))) => {
                    let mut writer = self.writer.lock().await;
                    if let Some(sink) = writer.as_mut() {
                        sink.send(Message::Pong(payload))
                            .await
                            .map_err(|e| self.fail(&e))?;
                    }
                }
                Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    self.set_state(TransportState::Closed);
                    let reason = frame.map(|f| format!("{} {}", u16::from(f.code), f.reason.as_str()));
                    tracing::info!(reason = ?reason, "Server sent close frame");
                    return Err(TransportError::Closed { reason });
                }
                Some(Err(e)) => return Err(self.fail(&e)),
                None => {
                    self.set_state(TransportState::Closed);
                    return Err(TransportError::Closed { reason: None });
                }
            }
        }
    }

    async fn close(&self, reason: &str) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        let Some(mut sink) = writer.take() else {
            return Err(TransportError::NotConnected);
        };
        self.set_state(TransportState::Closing);

        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: reason.to_owned().into(),
        }));
        let result = match sink.send(close).await {
            Ok(()) => sink.close().await.map_err(|e| TransportError::Socket(e.to_string())),
            Err(e) => Err(TransportError::Socket(e.to_string())),
        };

        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        self.set_state(TransportState::Closed);
        result
    }

    fn abort(&self) {
        if let Ok(mut writer) = self.writer.try_lock() {
            writer.take();
        }
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
        let mut state = self.state.lock();
        if *state != TransportState::Closed {
            *state = TransportState::Aborted;
        }
    }
}
