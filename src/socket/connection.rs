//! Connection state machine.
//!
//! [`WebSocket`] owns at most one live [`Transport`] at a time and turns its
//! lifecycle events into explicit [`ConnectionState`] transitions.
//!
//! # Sessions
//!
//! Every successful call to `connect` starts a new *session*: a fresh
//! transport, a generation number, an event task and an interrupt signal.
//! Tearing the session down (disconnect, peer close, transport failure,
//! reconnect) fires the interrupt, which resumes every caller suspended in
//! `connect`, `send` or `receive` with an error. Events from an older
//! generation are ignored.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::{self, SocketBuilder};
use crate::error::{Error, Result};
use crate::transport::{CloseCode, Message, Transport, TransportEvent, TransportFactory};

use super::reconnect::{AutoReconnect, ReconnectPolicy};
use super::state::{ConnectionState, StateObserver};
use super::stream::MessageStream;

// ============================================================================
// Interrupt
// ============================================================================

/// Why a session ended, delivered to suspended callers.
#[derive(Debug, Clone)]
enum Interrupt {
    /// Explicit disconnect.
    Cancelled,
    /// Transport failure.
    Failed(String),
    /// Peer closed, or the session was replaced by a reconnect.
    Closed,
    /// Connect attempt timed out.
    TimedOut(u64),
}

impl Interrupt {
    fn to_error(&self) -> Error {
        match self {
            Self::Cancelled => Error::Cancelled,
            Self::Failed(message) => Error::connection(message.clone()),
            Self::Closed => Error::ConnectionClosed,
            Self::TimedOut(ms) => Error::connection_timeout(*ms),
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// One transport and everything tied to it.
struct Session {
    /// The transport.
    transport: Arc<dyn Transport>,
    /// Fired once when the session ends.
    interrupt: watch::Sender<Option<Interrupt>>,
    /// Pending `connect` caller.
    connect_tx: Option<oneshot::Sender<Result<()>>>,
    /// Task draining transport events.
    events_task: JoinHandle<()>,
}

/// Mutable state guarded by one lock.
struct Shared {
    state: ConnectionState,
    /// Incremented for every session.
    generation: u64,
    /// Set by `disconnect`, cleared by `connect`. Reconnects never clear it.
    closed_by_user: bool,
    session: Option<Session>,
}

// ============================================================================
// SocketInner
// ============================================================================

/// Shared state behind every [`WebSocket`] clone.
pub(crate) struct SocketInner {
    factory: Arc<dyn TransportFactory>,
    url: Option<Url>,
    connect_timeout: Duration,
    observer: Option<StateObserver>,
    reconnect: ReconnectPolicy,
    shared: Mutex<Shared>,
    /// Updated under `shared`, so subscribers see transitions in order.
    state_tx: watch::Sender<ConnectionState>,
    /// Bumped by every explicit `disconnect`.
    disconnects: watch::Sender<u64>,
}

impl SocketInner {
    /// Moves to `next` and publishes it to subscribers.
    ///
    /// Called with `shared` held.
    fn commit(&self, shared: &mut Shared, next: ConnectionState) -> ConnectionState {
        trace!(state = %next, "State transition");
        shared.state = next.clone();
        self.state_tx.send_replace(next.clone());
        next
    }

    /// Runs the observer. Must be called without holding `shared`.
    fn notify(&self, state: &ConnectionState) {
        if let Some(observer) = &self.observer {
            observer(state);
        }
    }

    /// Ends the current session.
    ///
    /// `cancel` closes the transport with the given code; `None` means the
    /// transport has already gone away by itself.
    fn end_session(shared: &mut Shared, interrupt: Interrupt, cancel: Option<CloseCode>) {
        if let Some(mut session) = shared.session.take() {
            if let Some(code) = cancel {
                session.transport.cancel(code, None);
            }
            if let Some(tx) = session.connect_tx.take() {
                let _ = tx.send(Err(interrupt.to_error()));
            }
            session.interrupt.send_replace(Some(interrupt));
            session.events_task.abort();
        }
    }

    /// Applies a transport event. Returns `false` once the session is over.
    fn handle_event(&self, generation: u64, event: TransportEvent) -> bool {
        let (published, keep_going) = {
            let mut shared = self.shared.lock();
            if shared.generation != generation || shared.session.is_none() {
                return false;
            }

            match event {
                TransportEvent::Ready { protocol } => {
                    if !shared.state.is_connecting() {
                        return true;
                    }
                    info!(url = ?self.url, ?protocol, "WebSocket connected");
                    let next = self.commit(&mut shared, ConnectionState::Connected { protocol });
                    if let Some(tx) = shared.session.as_mut().and_then(|s| s.connect_tx.take()) {
                        let _ = tx.send(Ok(()));
                    }
                    (next, true)
                }

                TransportEvent::Failed { message } => {
                    warn!(url = ?self.url, error = %message, "Connection failed");
                    let next =
                        ConnectionState::disconnected(CloseCode::Abnormal, Some(message.as_str()));
                    Self::end_session(&mut shared, Interrupt::Failed(message), None);
                    (self.commit(&mut shared, next), false)
                }

                TransportEvent::Closed { code, reason } => {
                    info!(url = ?self.url, %code, "Connection closed by peer");
                    let next = ConnectionState::Disconnected {
                        close_code: code,
                        reason,
                    };
                    Self::end_session(&mut shared, Interrupt::Closed, None);
                    (self.commit(&mut shared, next), false)
                }

                TransportEvent::Cancelled => {
                    debug!(url = ?self.url, "Transport cancelled");
                    let next = ConnectionState::disconnected(CloseCode::Normal, None);
                    Self::end_session(&mut shared, Interrupt::Cancelled, None);
                    (self.commit(&mut shared, next), false)
                }
            }
        };

        self.notify(&published);
        keep_going
    }

    /// Drains transport events for one session.
    async fn run_events(
        inner: Weak<SocketInner>,
        generation: u64,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if !inner.handle_event(generation, event) {
                break;
            }
        }
        trace!(generation, "Event task terminated");
    }

    /// Starts a session. Returns its generation and the readiness cell.
    ///
    /// A reconnect fails with [`Error::Cancelled`] once the socket was
    /// closed explicitly; a caller's `connect` reopens it.
    fn begin_connect(
        self: &Arc<Self>,
        reconnect: bool,
    ) -> Result<(u64, oneshot::Receiver<Result<()>>)> {
        let (generation, ready_rx, transport, events_tx) = {
            let mut shared = self.shared.lock();
            if reconnect && shared.closed_by_user {
                debug!(url = ?self.url, "Reconnect skipped after disconnect");
                return Err(Error::Cancelled);
            }
            if shared.state.is_connecting() || shared.state.is_connected() {
                return Err(Error::already_connected(shared.state.name()));
            }

            let transport = self.factory.make_transport()?;
            let (events_tx, events_rx) = mpsc::unbounded_channel();
            let (connect_tx, ready_rx) = oneshot::channel();

            shared.generation += 1;
            shared.closed_by_user = false;
            let generation = shared.generation;

            let events_task = tokio::spawn(Self::run_events(
                Arc::downgrade(self),
                generation,
                events_rx,
            ));

            shared.session = Some(Session {
                transport: Arc::clone(&transport),
                interrupt: watch::channel(None).0,
                connect_tx: Some(connect_tx),
                events_task,
            });
            self.commit(&mut shared, ConnectionState::Connecting);

            (generation, ready_rx, transport, events_tx)
        };

        self.notify(&ConnectionState::Connecting);

        // A disconnect may have raced the observer.
        let shared = self.shared.lock();
        if shared.generation == generation && shared.session.is_some() {
            debug!(url = ?self.url, generation, "Connecting");
            transport.resume(events_tx);
        }
        drop(shared);

        Ok((generation, ready_rx))
    }

    /// Ends session `generation` after its connect attempt timed out.
    fn abort_connect(&self, generation: u64, timeout_ms: u64) {
        let published = {
            let mut shared = self.shared.lock();
            if shared.generation != generation || shared.session.is_none() {
                return;
            }
            let next = ConnectionState::disconnected(CloseCode::Abnormal, Some("connect timed out"));
            Self::end_session(
                &mut shared,
                Interrupt::TimedOut(timeout_ms),
                Some(CloseCode::Abnormal),
            );
            self.commit(&mut shared, next)
        };
        self.notify(&published);
    }

    /// Returns the live transport and interrupt signal, if connected.
    fn active(&self) -> Result<(Arc<dyn Transport>, watch::Receiver<Option<Interrupt>>)> {
        let shared = self.shared.lock();
        match (&shared.state, &shared.session) {
            (ConnectionState::Connected { .. }, Some(session)) => Ok((
                Arc::clone(&session.transport),
                session.interrupt.subscribe(),
            )),
            _ => Err(Error::NotConnected),
        }
    }

    /// Tears down the current session on request of the caller.
    fn disconnect(&self) {
        let published = {
            let mut shared = self.shared.lock();
            shared.closed_by_user = true;
            self.disconnects.send_modify(|count| *count += 1);

            let (next, code) = match shared.state {
                ConnectionState::Connected { .. } => (
                    ConnectionState::disconnected(CloseCode::Normal, None),
                    CloseCode::Normal,
                ),
                ConnectionState::Connecting => (
                    ConnectionState::disconnected(CloseCode::Abnormal, None),
                    CloseCode::Abnormal,
                ),
                _ => return,
            };

            Self::end_session(&mut shared, Interrupt::Cancelled, Some(code));
            self.commit(&mut shared, next)
        };

        info!(url = ?self.url, "WebSocket disconnected");
        self.notify(&published);
    }

    /// Replaces the current session with a closed one, for reconnecting.
    fn retire(&self) {
        let published = {
            let mut shared = self.shared.lock();
            if shared.session.is_none() || shared.closed_by_user {
                return;
            }
            let next = ConnectionState::disconnected(CloseCode::GoingAway, None);
            Self::end_session(&mut shared, Interrupt::Closed, Some(CloseCode::GoingAway));
            self.commit(&mut shared, next)
        };
        self.notify(&published);
    }
}

impl Drop for SocketInner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut();
        Self::end_session(shared, Interrupt::Cancelled, Some(CloseCode::GoingAway));
    }
}

/// Waits until the interrupt fires and returns its error.
async fn interrupted(signal: &mut watch::Receiver<Option<Interrupt>>) -> Error {
    loop {
        let current = signal.borrow_and_update().clone();
        if let Some(interrupt) = current {
            return interrupt.to_error();
        }
        if signal.changed().await.is_err() {
            return Error::Cancelled;
        }
    }
}

// ============================================================================
// WebSocket
// ============================================================================

/// A WebSocket client connection.
///
/// Cheap to clone; all clones share one connection. The connection is
/// closed when the last clone is dropped.
///
/// # Example
///
/// ```ignore
/// use duplex_rpc::WebSocket;
///
/// let socket = WebSocket::builder()
///     .url("ws://127.0.0.1:5601/api/v1")
///     .build()?;
///
/// socket.connect().await?;
/// socket.send("first message").await?;
/// let reply = socket.receive().await?;
/// socket.disconnect();
/// ```
#[derive(Clone)]
pub struct WebSocket {
    pub(crate) inner: Arc<SocketInner>,
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("url", &self.inner.url)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// WebSocket - Constructor
// ============================================================================

impl WebSocket {
    /// Returns a builder for configuring a socket.
    #[inline]
    #[must_use]
    pub fn builder() -> SocketBuilder {
        SocketBuilder::new()
    }

    /// Creates a socket. Use [`WebSocket::builder`] instead.
    pub(crate) fn new(
        factory: Arc<dyn TransportFactory>,
        url: Option<Url>,
        connect_timeout: Duration,
        auto_reconnect: AutoReconnect,
        observer: Option<StateObserver>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::NotConnected);

        Self {
            inner: Arc::new(SocketInner {
                factory,
                url,
                connect_timeout,
                observer,
                reconnect: ReconnectPolicy::new(auto_reconnect),
                shared: Mutex::new(Shared {
                    state: ConnectionState::NotConnected,
                    generation: 0,
                    closed_by_user: false,
                    session: None,
                }),
                state_tx,
                disconnects: watch::channel(0).0,
            }),
        }
    }
}

// ============================================================================
// WebSocket - State
// ============================================================================

impl WebSocket {
    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state.clone()
    }

    /// Returns `true` if messages may flow.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.shared.lock().state.is_connected()
    }

    /// Subscribes to state transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Waits until the socket reaches a state matching `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the socket is dropped first.
    pub async fn wait_for(&self, predicate: impl Fn(&ConnectionState) -> bool) -> Result<ConnectionState> {
        let mut states = self.subscribe();
        let state = states
            .wait_for(|state| predicate(state))
            .await
            .map_err(|_| Error::Cancelled)?;
        Ok(state.clone())
    }

    /// Close code of the last teardown, [`CloseCode::Invalid`] if none.
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        self.state().close_code().unwrap_or_default()
    }

    /// Endpoint URL, when the socket was built from one.
    #[inline]
    #[must_use]
    pub fn url(&self) -> Option<&Url> {
        self.inner.url.as_ref()
    }

    /// Reconnect configuration.
    #[inline]
    #[must_use]
    pub fn auto_reconnect(&self) -> AutoReconnect {
        self.inner.reconnect.config()
    }

    /// Generation of the connected session, `None` unless connected.
    pub(crate) fn connected_generation(&self) -> Option<u64> {
        let shared = self.inner.shared.lock();
        shared.state.is_connected().then_some(shared.generation)
    }

    /// Returns `true` if the socket was connected before and not closed
    /// explicitly since.
    pub(crate) fn may_reconnect(&self) -> bool {
        let shared = self.inner.shared.lock();
        shared.generation > 0 && !shared.closed_by_user
    }

    /// Signal bumped by every explicit [`WebSocket::disconnect`].
    pub(crate) fn disconnect_signal(&self) -> watch::Receiver<u64> {
        self.inner.disconnects.subscribe()
    }
}

// ============================================================================
// WebSocket - Lifecycle
// ============================================================================

impl WebSocket {
    /// Connects with the configured timeout.
    ///
    /// # Errors
    ///
    /// See [`WebSocket::connect_with_timeout`].
    pub async fn connect(&self) -> Result<()> {
        self.connect_with_timeout(self.inner.connect_timeout).await
    }

    /// Connects, waiting at most `connect_timeout` for the transport.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyConnected`] if connecting or connected
    /// - [`Error::Connection`] if the transport fails
    /// - [`Error::ConnectionTimeout`] if the transport is not ready in time
    /// - [`Error::Cancelled`] if `disconnect` is called meanwhile
    pub async fn connect_with_timeout(&self, connect_timeout: Duration) -> Result<()> {
        self.open(connect_timeout, false).await
    }

    async fn open(&self, connect_timeout: Duration, reconnect: bool) -> Result<()> {
        let (generation, ready_rx) = self.inner.begin_connect(reconnect)?;

        match timeout(connect_timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                let timeout_ms = config::millis(connect_timeout);
                warn!(url = ?self.inner.url, timeout_ms, "Connect timed out");
                self.inner.abort_connect(generation, timeout_ms);
                Err(Error::connection_timeout(timeout_ms))
            }
        }
    }

    /// Closes the connection.
    ///
    /// Idempotent. A connected socket is closed gracefully, a connecting one
    /// abruptly. Every suspended `connect`, `send` and `receive` resolves
    /// with [`Error::Cancelled`].
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Drops the current session and connects a fresh transport.
    ///
    /// Fails with [`Error::Cancelled`] once the socket was disconnected
    /// explicitly.
    pub(crate) async fn restart(&self) -> Result<()> {
        self.inner.retire();
        self.open(self.inner.connect_timeout, true).await
    }
}

// ============================================================================
// WebSocket - Messaging
// ============================================================================

impl WebSocket {
    /// Sends a message and waits until the transport accepted it.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] unless connected
    /// - [`Error::Cancelled`] if disconnected while sending
    /// - transport errors, after reconnect attempts if enabled
    pub async fn send(&self, message: impl Into<Message>) -> Result<()> {
        let message = message.into();
        self.inner
            .reconnect
            .run(self, "send", || self.send_once(message.clone()))
            .await
    }

    /// Waits for the next message and returns its payload.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] unless connected
    /// - [`Error::Cancelled`] if disconnected while waiting
    /// - [`Error::ConnectionClosed`] if the peer closed the connection
    pub async fn receive(&self) -> Result<Bytes> {
        self.receive_message().await.map(Message::into_bytes)
    }

    /// Waits for the next message, keeping its frame type.
    ///
    /// # Errors
    ///
    /// See [`WebSocket::receive`].
    pub async fn receive_message(&self) -> Result<Message> {
        self.inner
            .reconnect
            .run(self, "receive", || self.receive_once())
            .await
    }

    /// Returns a stream of received payloads.
    #[must_use]
    pub fn stream(&self) -> MessageStream {
        MessageStream::new(self.clone())
    }

    async fn send_once(&self, message: Message) -> Result<()> {
        let (transport, mut signal) = self.inner.active()?;
        let len = message.len();

        tokio::select! {
            result = transport.send(message) => {
                if let Err(e) = &result {
                    warn!(error = %e, "Send failed");
                } else {
                    trace!(len, "Message sent");
                }
                result
            }
            error = interrupted(&mut signal) => Err(error),
        }
    }

    async fn receive_once(&self) -> Result<Message> {
        let (transport, mut signal) = self.inner.active()?;

        tokio::select! {
            result = transport.receive() => {
                if let Ok(message) = &result {
                    trace!(len = message.len(), "Message received");
                }
                result
            }
            error = interrupted(&mut signal) => Err(error),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
