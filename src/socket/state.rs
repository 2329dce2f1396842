//! Connection state of a [`WebSocket`](super::WebSocket).

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::transport::CloseCode;

// ============================================================================
// Types
// ============================================================================

/// Callback invoked synchronously on every state transition.
///
/// Runs outside the socket's internal lock, so it may query the socket,
/// but it must return quickly.
pub type StateObserver = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle of a socket.
///
/// ```text
/// NotConnected ──► Connecting ──► Connected ──► Disconnected
///                      ▲                             │
///                      └─────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Initial state, nothing attempted yet.
    #[default]
    NotConnected,
    /// Waiting for the transport to become ready.
    Connecting,
    /// Messages may flow.
    Connected {
        /// Negotiated subprotocol, if any.
        protocol: Option<String>,
    },
    /// Torn down.
    Disconnected {
        /// Close code of the teardown.
        close_code: CloseCode,
        /// Close reason, if one was given.
        reason: Option<Bytes>,
    },
}

impl ConnectionState {
    /// Returns `true` if messages may flow.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Returns `true` while a connection attempt is in flight.
    #[inline]
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }

    /// Returns `true` after a teardown.
    #[inline]
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }

    /// Close code of the teardown, if any.
    #[inline]
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Disconnected { close_code, .. } => Some(*close_code),
            _ => None,
        }
    }

    /// Short lowercase name of the state.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::NotConnected => "not connected",
            Self::Connecting => "connecting",
            Self::Connected { .. } => "connected",
            Self::Disconnected { .. } => "disconnected",
        }
    }

    /// Builds a disconnected state from a textual reason.
    #[inline]
    #[must_use]
    pub(crate) fn disconnected(close_code: CloseCode, reason: Option<&str>) -> Self {
        Self::Disconnected {
            close_code,
            reason: reason.map(|r| Bytes::copy_from_slice(r.as_bytes())),
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected {
                protocol: Some(protocol),
            } => write!(f, "connected ({protocol})"),
            Self::Disconnected { close_code, .. } => write!(f, "disconnected ({close_code})"),
            other => f.write_str(other.name()),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
