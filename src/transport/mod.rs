//! Transport abstraction.
//!
//! The core never speaks WebSocket framing itself. It drives an object that
//! already does (handshake, opcodes, ping/pong) through the [`Transport`]
//! trait and listens to its lifecycle through [`TransportEvent`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐   make_transport()   ┌──────────────────┐
//! │  WebSocket      │─────────────────────►│ TransportFactory │
//! │  (state machine)│                      └──────────────────┘
//! │                 │  resume / send /     ┌──────────────────┐
//! │                 │  receive / cancel    │  Transport       │──► network
//! │                 │─────────────────────►│  (single use)    │
//! │                 │◄─────────────────────│                  │
//! └─────────────────┘   TransportEvent     └──────────────────┘
//! ```
//!
//! A transport is single-use: every `connect` asks the factory for a new one.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `tungstenite` | Network transport backed by `tokio-tungstenite` |
//! | `trust` | TLS trust decisions delegated to the caller |

// ============================================================================
// Submodules
// ============================================================================

/// Network transport backed by `tokio-tungstenite`.
pub mod tungstenite;

/// TLS trust authority.
pub mod trust;

/// In-memory transport double.
#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::Result;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::trust::{DefaultTrust, TrustAuthority, TrustDecision, TrustedHost};
pub use self::tungstenite::{TungsteniteFactory, TungsteniteTransport};

// ============================================================================
// Types
// ============================================================================

/// Sender half used by a transport to report its lifecycle.
pub type TransportEvents = mpsc::UnboundedSender<TransportEvent>;

// ============================================================================
// Message
// ============================================================================

/// A complete WebSocket data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
}

impl Message {
    /// Returns the payload bytes regardless of frame type.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Text(text) => text.as_bytes(),
            Self::Binary(data) => data,
        }
    }

    /// Consumes the message and returns its payload.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        match self {
            Self::Text(text) => Bytes::from(text),
            Self::Binary(data) => data,
        }
    }

    /// Returns the payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Returns `true` if the payload is empty.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Self::Binary(data)
    }
}

impl From<Vec<u8>> for Message {
    fn from(data: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(data))
    }
}

// ============================================================================
// CloseCode
// ============================================================================

/// WebSocket close code (RFC 6455 section 7.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CloseCode {
    /// No close has happened yet.
    #[default]
    Invalid,
    /// 1000: normal closure.
    Normal,
    /// 1001: endpoint going away.
    GoingAway,
    /// 1002: protocol error.
    ProtocolError,
    /// 1006: connection dropped without a close frame.
    Abnormal,
    /// Any other code.
    Other(u16),
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            0 => Self::Invalid,
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1006 => Self::Abnormal,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        match code {
            CloseCode::Invalid => 0,
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::Abnormal => 1006,
            CloseCode::Other(other) => other,
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u16::from(*self))
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// Lifecycle notification emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Handshake finished; messages may flow.
    Ready {
        /// Negotiated subprotocol, if any.
        protocol: Option<String>,
    },
    /// The connection could not be established or broke.
    Failed {
        /// Description of the failure.
        message: String,
    },
    /// The peer closed the connection.
    Closed {
        /// Close code sent by the peer.
        code: CloseCode,
        /// Close reason sent by the peer.
        reason: Option<Bytes>,
    },
    /// The transport was cancelled locally.
    Cancelled,
}

// ============================================================================
// Transport
// ============================================================================

/// A single-use, message-level WebSocket transport.
///
/// Implementations must be cheap to call concurrently: `send` and
/// `receive` may be in flight at the same time from different tasks.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Starts connecting.
    ///
    /// Must not block. Readiness or failure is reported through `events`.
    fn resume(&self, events: TransportEvents);

    /// Waits for the next data message.
    async fn receive(&self) -> Result<Message>;

    /// Writes a message, returning once the write is acknowledged.
    async fn send(&self, message: Message) -> Result<()>;

    /// Closes the transport with the given code and reason.
    fn cancel(&self, code: CloseCode, reason: Option<Bytes>);

    /// Close code of the transport, [`CloseCode::Invalid`] while open.
    fn close_code(&self) -> CloseCode;
}

// ============================================================================
// TransportFactory
// ============================================================================

/// Builds a fresh [`Transport`] for every connection attempt.
pub trait TransportFactory: Send + Sync + 'static {
    /// Creates a new, not yet resumed transport.
    fn make_transport(&self) -> Result<Arc<dyn Transport>>;
}

// ============================================================================
// Tests
// ============================================================================
