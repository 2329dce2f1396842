//! Connected-client registry.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tracing::{debug, trace};

use crate::identifiers::ClientId;
use crate::transport::Message;

// ============================================================================
// Types
// ============================================================================

/// Outbound queue of one client, drained by its writer task.
pub(crate) type Outbound = mpsc::UnboundedSender<WsMessage>;

/// Registry entry of one client.
struct ClientHandle {
    addr: SocketAddr,
    outbound: Outbound,
}

// ============================================================================
// ClientSet
// ============================================================================

/// Clients currently connected to a server.
///
/// Handlers use it to address replies; every send only queues the frame,
/// so calls never block on a slow client.
#[derive(Default)]
pub struct ClientSet {
    clients: Mutex<FxHashMap<ClientId, ClientHandle>>,
}

impl std::fmt::Debug for ClientSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSet")
            .field("len", &self.len())
            .finish()
    }
}

impl ClientSet {
    /// Creates an empty set.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of connected clients.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Returns `true` if no client is connected.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }

    /// Returns the ids of all connected clients.
    #[must_use]
    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.lock().keys().copied().collect()
    }

    /// Returns the peer address of a client.
    #[must_use]
    pub fn addr(&self, id: ClientId) -> Option<SocketAddr> {
        self.clients.lock().get(&id).map(|client| client.addr)
    }

    /// Queues a message for one client.
    ///
    /// Returns `false` if the client is gone.
    pub fn send_to(&self, id: ClientId, message: Message) -> bool {
        let clients = self.clients.lock();
        let Some(client) = clients.get(&id) else {
            debug!(%id, "Send to unknown client");
            return false;
        };
        client.outbound.send(to_frame(message)).is_ok()
    }

    /// Queues a message for every client.
    ///
    /// Returns the number of clients reached.
    pub fn broadcast(&self, message: Message) -> usize {
        let frame = to_frame(message);
        let clients = self.clients.lock();

        let reached = clients
            .values()
            .filter(|client| client.outbound.send(frame.clone()).is_ok())
            .count();

        trace!(reached, "Broadcast queued");
        reached
    }

    pub(crate) fn insert(&self, id: ClientId, addr: SocketAddr, outbound: Outbound) {
        self.clients.lock().insert(id, ClientHandle { addr, outbound });
    }

    pub(crate) fn remove(&self, id: ClientId) -> bool {
        self.clients.lock().remove(&id).is_some()
    }

    /// Queues a normal close frame for every client and forgets them all.
    pub(crate) fn close_all(&self) -> usize {
        let drained: Vec<_> = self.clients.lock().drain().collect();
        let count = drained.len();

        for (id, client) in drained {
            let frame = CloseFrame {
                code: WsCloseCode::Normal,
                reason: "server stopping".into(),
            };
            if client.outbound.send(WsMessage::Close(Some(frame))).is_err() {
                debug!(%id, "Client already gone");
            }
        }
        count
    }
}

/// Converts a data message to its wire frame.
pub(crate) fn to_frame(message: Message) -> WsMessage {
    match message {
        Message::Text(text) => WsMessage::text(text),
        Message::Binary(data) => WsMessage::binary(data),
    }
}

// ============================================================================
// Tests
// ============================================================================
