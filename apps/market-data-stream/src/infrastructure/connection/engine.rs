//! Connection Engine
//!
//! Owns one [`Transport`] and drives it through the connection lifecycle:
//!
//! - `connect`: validate, then a bounded sequence of transport connects with a
//!   fixed delay between attempts. On success the receive loop and the
//!   heartbeat scheduler start.
//! - Receive loop: one background task per successful connect. Frames are
//!   decoded, heartbeat replies discarded, and everything else published on the
//!   raw-frame channel and routed. A transport fault triggers an automatic
//!   reconnect with the last parameters; a receive timeout on a socket that is
//!   still open is treated as a silent server and leads to a graceful
//!   disconnect.
//! - `disconnect`: stop background work, close the socket within the
//!   connection timeout, always end `Disconnected`.
//! - `dispose`: final; afterwards every operation is a silent no-op.
//!
//! State transitions go through one mutex so guard-then-act checks are atomic,
//! and every change is published on a broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use super::deadline::{AbortReason, Deadline};
use super::heartbeat::HeartbeatScheduler;
use crate::application::ports::{Frame, HeartbeatProvider, Transport};
use crate::domain::connection::{ConfigurationError, ConnectionParameters, ConnectionState};
use crate::infrastructure::bybit::correlator::PayloadSender;
use crate::infrastructure::bybit::messages::OutboundRequest;
use crate::infrastructure::bybit::router::MessageRouter;
use crate::infrastructure::metrics::{self, AttemptOutcome};

/// Capacity of the state-change and raw-frame broadcast channels.
const CHANNEL_CAPACITY: usize = 1024;

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced by [`ConnectionEngine::connect`].
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Parameters rejected before any I/O.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// Every permitted attempt failed.
    #[error("could not establish connection with {host} even after {attempts} attempts")]
    AttemptsExhausted {
        /// Stream host.
        host: String,
        /// Attempts made.
        attempts: u64,
    },

    /// The caller cancelled the attempt sequence.
    #[error("connecting to {host} was cancelled")]
    Cancelled {
        /// Stream host.
        host: String,
    },
}

/// Errors surfaced by [`ConnectionEngine::send`].
///
/// Transport failures while sending are logged, not returned.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The engine is not connected.
    #[error("not connected")]
    NotConnected,

    /// The payload could not be serialized.
    #[error("payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug)]
struct ReceiveSession {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ReceiveSession {
    fn is_active(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

enum LoopExit {
    Stopped,
    Reconnect,
    Disconnect,
}

struct Shared<T> {
    transport: T,
    heartbeat: Arc<dyn HeartbeatProvider>,
    router: Arc<MessageRouter>,
    state: Mutex<ConnectionState>,
    state_tx: broadcast::Sender<ConnectionState>,
    frames_tx: broadcast::Sender<Arc<Value>>,
    parameters: Mutex<Option<ConnectionParameters>>,
    session: Mutex<Option<ReceiveSession>>,
    heartbeat_timer: Mutex<Option<HeartbeatScheduler>>,
    disposed: AtomicBool,
}

impl<T> Shared<T> {
    fn apply(&self, current: &mut ConnectionState, next: ConnectionState) -> bool {
        if *current == next {
            return false;
        }
        let previous = std::mem::replace(current, next);
        tracing::debug!(from = %previous, to = %next, "Connection state changed");
        metrics::set_connection_state(next);
        let _ = self.state_tx.send(next);
        true
    }

    fn set_state(&self, next: ConnectionState) -> bool {
        let mut state = self.state.lock();
        self.apply(&mut state, next)
    }

    /// Move to `next` only when the current state satisfies `allowed`.
    fn transition_if(&self, allowed: impl FnOnce(ConnectionState) -> bool, next: ConnectionState) -> bool {
        let mut state = self.state.lock();
        allowed(*state) && self.apply(&mut state, next)
    }

    fn connection_timeout(&self) -> Option<Duration> {
        self.parameters
            .lock()
            .as_ref()
            .and_then(|p| p.connection_timeout)
    }

    fn stop_receive_loop(&self) {
        if let Some(session) = self.session.lock().take() {
            session.cancel.cancel();
        }
    }

    fn stop_heartbeat(&self) {
        if let Some(scheduler) = self.heartbeat_timer.lock().take() {
            scheduler.stop();
        }
    }

    fn stop_background(&self) {
        self.stop_heartbeat();
        self.stop_receive_loop();
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Connection lifecycle engine over a [`Transport`].
///
/// Cheap to clone; clones share the same connection.
pub struct ConnectionEngine<T: Transport> {
    shared: Arc<Shared<T>>,
}

impl<T: Transport> Clone for ConnectionEngine<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Transport> std::fmt::Debug for ConnectionEngine<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionEngine")
            .field("state", &self.state())
            .field("transport", &self.shared.transport.state())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ConnectionEngine<T> {
    /// Create an engine that owns `transport`.
    pub fn new(transport: T, heartbeat: Arc<dyn HeartbeatProvider>, router: Arc<MessageRouter>) -> Self {
        let (state_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (frames_tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        Self {
            shared: Arc::new(Shared {
                transport,
                heartbeat,
                router,
                state: Mutex::new(ConnectionState::Disconnected),
                state_tx,
                frames_tx,
                parameters: Mutex::new(None),
                session: Mutex::new(None),
                heartbeat_timer: Mutex::new(None),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Observation
    // -------------------------------------------------------------------------

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    /// Subscribe to state changes. Same-state transitions are not published.
    #[must_use]
    pub fn state_changes(&self) -> broadcast::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// State changes as a stream; lagged notifications are skipped.
    pub fn state_stream(&self) -> impl Stream<Item = ConnectionState> + Send + 'static {
        BroadcastStream::new(self.state_changes()).filter_map(Result::ok)
    }

    /// Subscribe to every decoded inbound frame except heartbeat replies.
    #[must_use]
    pub fn raw_frames(&self) -> broadcast::Receiver<Arc<Value>> {
        self.shared.frames_tx.subscribe()
    }

    /// Router fed by the receive loop.
    #[must_use]
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.shared.router
    }

    /// The owned transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    /// Parameters of the most recent `connect`.
    #[must_use]
    pub fn parameters(&self) -> Option<ConnectionParameters> {
        self.shared.parameters.lock().clone()
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Whether a receive loop task is running.
    #[must_use]
    pub fn is_receiving(&self) -> bool {
        self.shared
            .session
            .lock()
            .as_ref()
            .is_some_and(ReceiveSession::is_active)
    }

    /// Whether the heartbeat scheduler is armed.
    #[must_use]
    pub fn is_heartbeating(&self) -> bool {
        self.shared
            .heartbeat_timer
            .lock()
            .as_ref()
            .is_some_and(HeartbeatScheduler::is_running)
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Connect with `parameters`, retrying per their reconnection policy.
    ///
    /// Returns immediately when disposed or already connecting or connected.
    /// `cancel` aborts the attempt sequence at any suspension point.
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::Configuration`] when the parameters are invalid;
    ///   nothing is attempted.
    /// - [`ConnectionError::AttemptsExhausted`] when every attempt failed.
    /// - [`ConnectionError::Cancelled`] when `cancel` fired first.
    pub async fn connect(
        &self,
        parameters: ConnectionParameters,
        cancel: &CancellationToken,
    ) -> Result<(), ConnectionError> {
        if self.is_disposed() || self.state().is_connecting_or_connected() {
            return Ok(());
        }

        parameters.validate()?;

        if !self
            .shared
            .transition_if(|s| !s.is_connecting_or_connected(), ConnectionState::Connecting)
        {
            return Ok(());
        }

        let host = parameters.host().to_owned();
        *self.shared.parameters.lock() = Some(parameters.clone());

        let mut attempt: u64 = 0;
        while parameters.reconnection_attempts.allows(attempt) {
            if self.is_disposed() {
                self.shared.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            if attempt > 0
                && Deadline::cancellation(cancel)
                    .run(tokio::time::sleep(parameters.retry_delay()))
                    .await
                    .is_err()
            {
                return Err(self.abandon_connect(host));
            }

            tracing::debug!(host = %host, attempt, "Connecting to stream");
            let deadline = Deadline::compose(cancel, parameters.connection_timeout);
            match deadline.run(self.shared.transport.connect(&host)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    metrics::record_connect_attempt(AttemptOutcome::Failed);
                    tracing::warn!(host = %host, attempt, error = %e, "Connect attempt failed");
                }
                Err(AbortReason::TimedOut) => {
                    metrics::record_connect_attempt(AttemptOutcome::TimedOut);
                    tracing::warn!(host = %host, attempt, "Connect attempt timed out");
                }
                Err(AbortReason::Cancelled) => return Err(self.abandon_connect(host)),
            }

            if self.shared.transport.state().is_open() {
                // Background work starts under the state lock so a disconnect
                // never observes `Connected` without it.
                let mut state = self.shared.state.lock();
                if *state != ConnectionState::Connecting {
                    drop(state);
                    tracing::debug!(host = %host, "Connect superseded by disconnect");
                    return Ok(());
                }
                self.shared.apply(&mut state, ConnectionState::Connected);
                self.start_receive_loop();
                self.arm_heartbeat(&parameters);
                drop(state);

                metrics::record_connect_attempt(AttemptOutcome::Succeeded);
                tracing::info!(host = %host, attempt, "Connected to stream");
                return Ok(());
            }

            if !matches!(self.state(), ConnectionState::Connecting) {
                tracing::debug!(host = %host, "Connect superseded by disconnect");
                return Ok(());
            }

            attempt += 1;
        }

        self.shared.stop_background();
        self.shared.set_state(ConnectionState::Disconnected);
        tracing::error!(host = %host, attempts = attempt, "Reconnection attempts exhausted");
        Err(ConnectionError::AttemptsExhausted {
            host,
            attempts: attempt,
        })
    }

    fn abandon_connect(&self, host: String) -> ConnectionError {
        self.shared.stop_background();
        self.shared.set_state(ConnectionState::Disconnected);
        tracing::info!(host = %host, "Connect cancelled");
        ConnectionError::Cancelled { host }
    }

    /// Gracefully close the connection.
    ///
    /// No-op when disposed, already disconnected or disconnecting, or when the
    /// transport is not open. Otherwise always ends `Disconnected`; close
    /// failures and timeouts are logged.
    pub async fn disconnect(&self, cancel: &CancellationToken) {
        if self.is_disposed() {
            return;
        }

        let began = {
            let mut state = self.shared.state.lock();
            let idle = matches!(
                *state,
                ConnectionState::Disconnected | ConnectionState::Disconnecting
            );
            !idle
                && self.shared.transport.state().is_open()
                && self.shared.apply(&mut state, ConnectionState::Disconnecting)
        };
        if !began {
            return;
        }

        self.shared.stop_background();

        let deadline = Deadline::compose(cancel, self.shared.connection_timeout());
        match deadline.run(self.shared.transport.close("Disconnect requested")).await {
            Ok(Ok(())) => tracing::info!("Disconnected from stream"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Close handshake failed"),
            Err(reason) => tracing::warn!(reason = %reason, "Close handshake abandoned"),
        }

        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Release everything. Idempotent; later calls to any operation are no-ops.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.shared.stop_background();
        self.shared.transport.abort();
        self.shared.set_state(ConnectionState::Disconnected);
        tracing::debug!("Connection engine disposed");
    }

    // -------------------------------------------------------------------------
    // Sending
    // -------------------------------------------------------------------------

    /// Serialize `payload` and send it as one text frame.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotConnected`] unless connected, and
    /// [`SendError::Serialization`] when `payload` cannot be encoded.
    pub async fn send<P>(&self, payload: &P) -> Result<(), SendError>
    where
        P: Serialize + Sync + ?Sized,
    {
        if self.is_disposed() || self.state() != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }

        let text = serde_json::to_string(payload)?;
        self.send_text(text).await;
        Ok(())
    }

    async fn send_text(&self, text: String) {
        tracing::trace!(frame = %text, "Sending frame");

        let deadline = Deadline::compose(&CancellationToken::new(), self.shared.connection_timeout());
        match deadline.run(self.shared.transport.send(Frame::Text(text))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Failed to send frame"),
            Err(reason) => tracing::warn!(reason = %reason, "Send abandoned"),
        }
    }

    // -------------------------------------------------------------------------
    // Heartbeat
    // -------------------------------------------------------------------------

    fn arm_heartbeat(&self, parameters: &ConnectionParameters) {
        let mut slot = self.shared.heartbeat_timer.lock();

        if !parameters.use_heartbeating {
            if let Some(scheduler) = slot.take() {
                scheduler.stop();
            }
            return;
        }

        let period = parameters.heartbeat_interval;
        if let Some(scheduler) = slot.as_ref() {
            scheduler.rearm(period);
            return;
        }

        let weak: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        *slot = Some(HeartbeatScheduler::start(period, move || {
            let weak = weak.clone();
            async move {
                if let Some(shared) = weak.upgrade() {
                    ConnectionEngine { shared }.send_heartbeat().await;
                }
            }
            .boxed()
        }));
    }

    async fn send_heartbeat(&self) {
        if self.is_disposed()
            || self.state() != ConnectionState::Connected
            || !self.shared.transport.state().is_open()
        {
            tracing::trace!("Skipping heartbeat while not connected");
            return;
        }

        let message = self.shared.heartbeat.next_message();
        self.send_text(message.to_string()).await;
        metrics::record_heartbeat_sent();
    }

    // -------------------------------------------------------------------------
    // Receive Loop
    // -------------------------------------------------------------------------

    fn start_receive_loop(&self) {
        let mut slot = self.shared.session.lock();
        if slot.as_ref().is_some_and(ReceiveSession::is_active) {
            tracing::debug!("Receive loop already running");
            return;
        }

        let cancel = CancellationToken::new();
        let engine = self.clone();
        let session = cancel.clone();
        let handle = tokio::spawn(async move { engine.run_receive_loop(session).await });
        *slot = Some(ReceiveSession { cancel, handle });
    }

    async fn run_receive_loop(self, session: CancellationToken) {
        tracing::debug!("Receive loop started");
        let exit = self.receive_until_exit(&session).await;
        session.cancel();

        match exit {
            LoopExit::Stopped => tracing::debug!("Receive loop stopped"),
            LoopExit::Reconnect => self.reconnect().await,
            LoopExit::Disconnect => self.disconnect(&CancellationToken::new()).await,
        }
    }

    async fn receive_until_exit(&self, session: &CancellationToken) -> LoopExit {
        loop {
            if session.is_cancelled() || self.is_disposed() {
                return LoopExit::Stopped;
            }
            if !self.shared.transport.state().is_open() {
                tracing::warn!("Transport no longer open, reconnecting");
                return LoopExit::Reconnect;
            }

            let deadline = Deadline::compose(session, self.shared.connection_timeout());
            match deadline.run(self.shared.transport.receive()).await {
                Ok(Ok(frame)) => self.handle_frame(&frame),
                Ok(Err(e)) if e.is_fault() => {
                    if session.is_cancelled() {
                        return LoopExit::Stopped;
                    }
                    tracing::warn!(error = %e, "Transport fault, reconnecting");
                    return LoopExit::Reconnect;
                }
                Ok(Err(e)) => {
                    metrics::record_frame_dropped("transport");
                    tracing::warn!(error = %e, "Dropping unreadable frame");
                }
                Err(AbortReason::Cancelled) => return LoopExit::Stopped,
                Err(AbortReason::TimedOut) => {
                    if self.shared.transport.state().is_open() {
                        tracing::warn!("Server silent past connection timeout, disconnecting");
                        return LoopExit::Disconnect;
                    }
                    tracing::warn!("Receive timed out on closed transport, reconnecting");
                    return LoopExit::Reconnect;
                }
            }
        }
    }

    fn handle_frame(&self, frame: &Frame) {
        let Some(text) = frame.as_text() else {
            metrics::record_frame_dropped("invalid_utf8");
            tracing::warn!("Dropping non UTF-8 frame");
            return;
        };
        tracing::trace!(frame = %text, "Received frame");

        let value: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                metrics::record_frame_dropped("invalid_json");
                tracing::warn!(error = %e, "Dropping undecodable frame");
                return;
            }
        };

        if self.shared.heartbeat.is_heartbeat_reply(&value) {
            tracing::trace!("Heartbeat reply");
            return;
        }

        let value = Arc::new(value);
        let _ = self.shared.frames_tx.send(Arc::clone(&value));
        self.shared.router.route(&value);
    }

    /// Boxed so the receive task's future type does not contain itself.
    fn reconnect(&self) -> BoxFuture<'static, ()> {
        let engine = self.clone();
        async move {
            let Some(parameters) = engine.parameters() else {
                return;
            };
            if engine.is_disposed()
                || !engine
                    .shared
                    .transition_if(|s| s == ConnectionState::Connected, ConnectionState::Disconnected)
            {
                return;
            }

            engine.shared.stop_background();
            metrics::record_reconnect();
            tracing::info!(host = %parameters.host(), "Reconnecting to stream");
            if let Err(e) = engine.connect(parameters, &CancellationToken::new()).await {
                tracing::error!(error = %e, "Automatic reconnect failed");
            }
        }
        .boxed()
    }
}

#[async_trait]
impl<T: Transport> PayloadSender for ConnectionEngine<T> {
    async fn send_request(&self, request: &OutboundRequest) -> Result<(), SendError> {
        self.send(request).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::application::ports::{MockTransport, NoOpHeartbeat, TransportError, TransportState};

    fn engine(transport: MockTransport) -> ConnectionEngine<MockTransport> {
        ConnectionEngine::new(
            transport,
            Arc::new(NoOpHeartbeat),
            Arc::new(MessageRouter::new()),
        )
    }

    #[tokio::test]
    async fn invalid_parameters_perform_no_io() {
        let mut transport = MockTransport::new();
        transport.expect_connect().never();
        transport.expect_state().return_const(TransportState::Closed);

        let engine = engine(transport);
        let mut states = engine.state_changes();
        let params = ConnectionParameters::default();

        let err = engine
            .connect(params, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ConnectionError::Configuration(ConfigurationError::MissingStreamHost)
        ));
        assert_eq!(engine.state(), ConnectionState::Disconnected);
        assert!(states.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_host_and_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut transport = MockTransport::new();
        let counter = Arc::clone(&calls);
        transport.expect_connect().returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::Socket("refused".into()))
        });
        transport.expect_state().return_const(TransportState::Closed);

        let engine = engine(transport);
        let params = ConnectionParameters::new("wss://stream.example")
            .with_reconnection(crate::domain::connection::ReconnectionAttempts::Limited(2), Duration::ZERO);

        let err = engine
            .connect(params, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            err.to_string(),
            "could not establish connection with wss://stream.example even after 3 attempts"
        );
        assert_eq!(engine.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let mut transport = MockTransport::new();
        transport.expect_send().never();
        transport.expect_state().return_const(TransportState::Closed);

        let engine = engine(transport);
        let result = engine.send(&serde_json::json!({"op": "ping"})).await;

        assert!(matches!(result, Err(SendError::NotConnected)));
    }

    #[tokio::test]
    async fn dispose_aborts_transport_once_and_silences_operations() {
        let mut transport = MockTransport::new();
        transport.expect_abort().times(1).return_const(());
        transport.expect_connect().never();
        transport.expect_close().never();
        transport.expect_state().return_const(TransportState::Closed);

        let engine = engine(transport);
        engine.dispose();
        engine.dispose();

        let params = ConnectionParameters::new("wss://stream.example");
        assert!(engine.connect(params, &CancellationToken::new()).await.is_ok());
        engine.disconnect(&CancellationToken::new()).await;
        assert!(engine.is_disposed());
        assert_eq!(engine.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_when_idle_is_noop() {
        let mut transport = MockTransport::new();
        transport.expect_close().never();
        transport.expect_state().return_const(TransportState::Closed);

        let engine = engine(transport);
        let mut states = engine.state_changes();
        engine.disconnect(&CancellationToken::new()).await;

        assert!(states.try_recv().is_err());
    }
}
