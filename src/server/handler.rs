//! Server-side message handling.

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;
use tracing::trace;

use crate::identifiers::ClientId;
use crate::transport::Message;

use super::ClientSet;

// ============================================================================
// MessageHandler
// ============================================================================

/// Reacts to messages received by a server.
///
/// One handler serves all clients; calls for one client arrive in order.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Called for every data message.
    async fn on_message(&self, client: ClientId, message: Message, clients: &ClientSet);

    /// Called once a client completed the handshake.
    async fn on_connect(&self, client: ClientId, clients: &ClientSet) {
        let _ = (client, clients);
    }

    /// Called once a client is gone.
    async fn on_disconnect(&self, client: ClientId, clients: &ClientSet) {
        let _ = (client, clients);
    }
}

// ============================================================================
// Echo
// ============================================================================

/// Replies to each message with the message itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct Echo;

#[async_trait]
impl MessageHandler for Echo {
    async fn on_message(&self, client: ClientId, message: Message, clients: &ClientSet) {
        trace!(%client, len = message.len(), "Echo");
        clients.send_to(client, message);
    }
}

// ============================================================================
// Broadcast
// ============================================================================

/// Relays each message to every connected client, sender included.
#[derive(Debug, Clone, Copy, Default)]
pub struct Broadcast;

#[async_trait]
impl MessageHandler for Broadcast {
    async fn on_message(&self, client: ClientId, message: Message, clients: &ClientSet) {
        let reached = clients.broadcast(message);
        trace!(%client, reached, "Broadcast");
    }
}
