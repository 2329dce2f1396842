//! Loopback WebSocket server.
//!
//! # Connection Flow
//!
//! 1. `start` binds the listener and spawns the accept loop
//! 2. Each TCP connection is wrapped in TLS (if configured) and upgraded
//! 3. The client is registered in the [`ClientSet`] under a fresh [`ClientId`]
//! 4. Inbound data messages go to the [`MessageHandler`]
//! 5. The client is removed when it closes, fails, or the server stops

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use crate::config::endpoint_url;
use crate::error::{Error, Result};
use crate::identifiers::ClientId;
use crate::transport::Message;

use super::clients::ClientSet;
use super::config::{ServerConfig, ServerStream, TlsAcceptor};
use super::handler::MessageHandler;

// ============================================================================
// Constants
// ============================================================================

/// Time `stop` waits for clients to finish their close handshake.
const CLIENT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

// ============================================================================
// Running
// ============================================================================

/// Handles of a started server.
struct Running {
    port: u16,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

// ============================================================================
// LoopbackServer
// ============================================================================

/// A small WebSocket server for tests and local tooling.
///
/// Restartable: after the first successful start the bound port is kept, so
/// `stop` followed by `start` listens on the same port again.
///
/// # Example
///
/// ```ignore
/// use duplex_rpc::server::{LoopbackServer, ServerConfig};
///
/// let server = LoopbackServer::new(ServerConfig::new());
/// let port = server.start().await?;
/// let url = server.ws_url("/api/v1")?;
///
/// // Connect clients to url...
///
/// server.stop().await;
/// ```
pub struct LoopbackServer {
    config: ServerConfig,
    clients: Arc<ClientSet>,
    running: Mutex<Option<Running>>,
    /// Port of the first successful start.
    pinned_port: Mutex<Option<u16>>,
}

impl std::fmt::Debug for LoopbackServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackServer")
            .field("config", &self.config)
            .field("port", &self.port())
            .field("clients", &self.client_count())
            .finish()
    }
}

// ============================================================================
// LoopbackServer - Constructor
// ============================================================================

impl LoopbackServer {
    /// Creates a stopped server.
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            clients: Arc::new(ClientSet::new()),
            running: Mutex::new(None),
            pinned_port: Mutex::new(None),
        }
    }
}

// ============================================================================
// LoopbackServer - Public API
// ============================================================================

impl LoopbackServer {
    /// Returns the configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the listening port, or the port it will reuse once restarted.
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        if let Some(running) = self.running.lock().as_ref() {
            return Some(running.port);
        }
        let pinned = *self.pinned_port.lock();
        pinned.or((self.config.port != 0).then_some(self.config.port))
    }

    /// Returns `true` while listening.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Returns the number of connected clients.
    #[inline]
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Returns the connected clients.
    #[inline]
    #[must_use]
    pub fn clients(&self) -> &Arc<ClientSet> {
        &self.clients
    }

    /// Returns the URL clients connect to.
    ///
    /// Format: `ws://{host}:{port}/{path}` (`wss` with TLS).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the port is not known yet.
    pub fn ws_url(&self, path: &str) -> Result<Url> {
        let port = self
            .port()
            .ok_or_else(|| Error::config("Server port unknown. Call start() first."))?;

        let scheme = if self.config.tls.is_some() { "wss" } else { "ws" };
        let host = match self.config.host {
            ip if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            ip => ip,
        };
        let host = match host {
            IpAddr::V4(ip) => ip.to_string(),
            IpAddr::V6(ip) => format!("[{ip}]"),
        };

        endpoint_url(scheme, &host, port, path)
    }
}

// ============================================================================
// LoopbackServer - Lifecycle
// ============================================================================

impl LoopbackServer {
    /// Binds the listener and starts accepting clients.
    ///
    /// Returns the bound port.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if already running or the host is not permitted
    /// - [`Error::Io`] if binding fails
    pub async fn start(&self) -> Result<u16> {
        if self.is_running() {
            return Err(Error::config("Server is already running"));
        }
        self.config.validate()?;

        let port = self.port().unwrap_or(0);
        let listener = TcpListener::bind(SocketAddr::new(self.config.host, port)).await?;
        let port = listener.local_addr()?.port();

        let mut running = self.running.lock();
        if running.is_some() {
            return Err(Error::config("Server is already running"));
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.clients),
            Arc::clone(&self.config.handler),
            self.config.tls.clone(),
            shutdown_rx,
        ));

        *running = Some(Running {
            port,
            shutdown,
            accept_task,
        });
        *self.pinned_port.lock() = Some(port);

        info!(host = %self.config.host, port, "Loopback server started");
        Ok(port)
    }

    /// Closes every client and stops listening.
    ///
    /// Idempotent. Returns once the port is released.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };

        info!(port = running.port, "Loopback server stopping");

        let closed = self.clients.close_all();
        running.shutdown.send_replace(true);

        if let Err(e) = running.accept_task.await
            && !e.is_cancelled()
        {
            error!(error = %e, "Accept loop panicked");
        }

        info!(port = running.port, closed, "Loopback server stopped");
    }
}

impl Drop for LoopbackServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.shutdown.send_replace(true);
            running.accept_task.abort();
        }
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

/// Background task that accepts new connections.
async fn accept_loop(
    listener: TcpListener,
    clients: Arc<ClientSet>,
    handler: Arc<dyn MessageHandler>,
    tls: Option<Arc<dyn TlsAcceptor>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Accept loop started");
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    connections.spawn(serve_client(
                        stream,
                        addr,
                        Arc::clone(&clients),
                        Arc::clone(&handler),
                        tls.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                }
            },

            // Reap finished clients
            Some(_) = connections.join_next(), if !connections.is_empty() => {}

            _ = shutdown.changed() => {
                debug!("Accept loop shutting down");
                break;
            }
        }
    }

    drop(listener);

    let drained = timeout(CLIENT_DRAIN_TIMEOUT, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(remaining = connections.len(), "Clients did not close in time");
        connections.abort_all();
    }

    debug!("Accept loop terminated");
}

/// Serves one client until it goes away or the server stops.
async fn serve_client(
    stream: TcpStream,
    addr: SocketAddr,
    clients: Arc<ClientSet>,
    handler: Arc<dyn MessageHandler>,
    tls: Option<Arc<dyn TlsAcceptor>>,
    shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = handle_connection(stream, addr, clients, handler, tls, shutdown).await {
        warn!(error = %e, ?addr, "Connection handling failed");
    }
}

/// Upgrades one connection and pumps its messages.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    clients: Arc<ClientSet>,
    handler: Arc<dyn MessageHandler>,
    tls: Option<Arc<dyn TlsAcceptor>>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    debug!(?addr, "New TCP connection");

    let stream: Box<dyn ServerStream> = match tls {
        Some(acceptor) => acceptor.accept(stream).await?,
        None => Box::new(stream),
    };

    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| Error::connection(format!("WebSocket upgrade failed: {e}")))?;

    let id = ClientId::generate();
    let (mut sink, mut source) = ws_stream.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();

    // Writer ends after a close frame or once the client is forgotten
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let closing = frame.is_close();
            if let Err(e) = sink.send(frame).await {
                debug!(error = %e, "Write to client failed");
                break;
            }
            if closing {
                break;
            }
        }
        let _ = sink.close().await;
    });

    clients.insert(id, addr, outbound);
    info!(%id, ?addr, "Client connected");
    handler.on_connect(id, &clients).await;

    loop {
        tokio::select! {
            frame = source.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let message = Message::Text(text.as_str().to_owned());
                    handler.on_message(id, message, &clients).await;
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    handler.on_message(id, Message::Binary(data), &clients).await;
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    trace!(%id, ?frame, "Client sent close");
                    break;
                }
                Some(Err(e)) => {
                    debug!(%id, error = %e, "Client read failed");
                    break;
                }
                None => break,

                // Ping, Pong and raw frames are handled by tungstenite
                Some(Ok(_)) => {}
            },

            _ = shutdown.changed() => break,
        }
    }

    clients.remove(id);
    handler.on_disconnect(id, &clients).await;

    if timeout(CLIENT_DRAIN_TIMEOUT, writer).await.is_err() {
        debug!(%id, "Writer did not finish in time");
    }

    info!(%id, ?addr, "Client disconnected");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
