//! Error types for the duplex RPC transport.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use duplex_rpc::{Result, WebSocket};
//!
//! async fn example(socket: &WebSocket) -> Result<()> {
//!     socket.send("ping").await?;
//!     let reply = socket.receive().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | State | [`Error::NotConnected`], [`Error::AlreadyConnected`], [`Error::Cancelled`] |
//! | Transport | [`Error::Connection`], [`Error::ConnectionTimeout`], [`Error::ConnectionClosed`] |
//! | Application | [`Error::ClientError`], [`Error::ServerError`] |
//! | Protocol | [`Error::UnexpectedStatus`] |
//! | Request | [`Error::RequestTimeout`] |
//! | Configuration | [`Error::Config`], [`Error::Tls`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

use crate::identifiers::CallbackId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // State Errors
    // ========================================================================
    /// Operation attempted while the socket is not connected.
    ///
    /// Always recoverable by the caller: connect, then retry.
    #[error("WebSocket is not connected")]
    NotConnected,

    /// `connect` called while a connection is being established or is open.
    #[error("WebSocket is already {state}")]
    AlreadyConnected {
        /// Name of the state the socket was in.
        state: String,
    },

    /// Operation was interrupted by an explicit disconnect.
    #[error("Operation cancelled")]
    Cancelled,

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Transport-level failure.
    ///
    /// Returned when the connection cannot be established or an
    /// I/O operation on it fails.
    #[error("Connection failed: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
    },

    /// Connection timeout.
    ///
    /// Returned when the transport does not become ready in time.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Connection closed by the peer or by a reconnect.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Application Errors
    // ========================================================================
    /// The remote rejected the request with a 4xx status.
    #[error("Client error {code}: {message}")]
    ClientError {
        /// Status code carried by the response envelope.
        code: i64,
        /// Message supplied by the server.
        message: String,
    },

    /// The remote failed the request with a 5xx status.
    #[error("Server error {code}: {message}")]
    ServerError {
        /// Status code carried by the response envelope.
        code: i64,
        /// Message supplied by the server.
        message: String,
    },

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Response status outside every known range.
    ///
    /// This is a protocol violation by the remote, not an application error.
    #[error("Unexpected response status: {code}")]
    UnexpectedStatus {
        /// The offending status code.
        code: i64,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// No response arrived for a request within its timeout.
    #[error("Request {callback_id} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The callback id of the request.
        callback_id: CallbackId,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when socket or server configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// TLS was refused for a host.
    #[error("TLS rejected for host: {host}")]
    Tls {
        /// Host the trust authority refused.
        host: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an already-connected error.
    #[inline]
    pub fn already_connected(state: impl Into<String>) -> Self {
        Self::AlreadyConnected {
            state: state.into(),
        }
    }

    /// Creates a connection error.
    #[inline]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a client error.
    #[inline]
    pub fn client_error(code: i64, message: impl Into<String>) -> Self {
        Self::ClientError {
            code,
            message: message.into(),
        }
    }

    /// Creates a server error.
    #[inline]
    pub fn server_error(code: i64, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
        }
    }

    /// Creates an unexpected status error.
    #[inline]
    pub fn unexpected_status(code: i64) -> Self {
        Self::UnexpectedStatus { code }
    }

    /// Creates a request timeout error.
    #[inline]
    pub fn request_timeout(callback_id: CallbackId, timeout_ms: u64) -> Self {
        Self::RequestTimeout {
            callback_id,
            timeout_ms,
        }
    }

    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a TLS rejection error.
    #[inline]
    pub fn tls(host: impl Into<String>) -> Self {
        Self::Tls { host: host.into() }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::RequestTimeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::Connection { .. }
                | Self::ConnectionTimeout { .. }
                | Self::ConnectionClosed
                | Self::WebSocket(_)
                | Self::Io(_)
        )
    }

    /// Returns `true` if the reconnect policy may retry after this error.
    ///
    /// Only transport-level failures qualify. Explicit cancellation and
    /// errors reported by the remote application are final.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.is_connection_error()
    }

    /// Returns `true` if the remote rejected the request (4xx or 5xx).
    #[inline]
    #[must_use]
    pub fn is_application_error(&self) -> bool {
        matches!(self, Self::ClientError { .. } | Self::ServerError { .. })
    }

    /// Returns `true` if the remote violated the wire protocol.
    #[inline]
    #[must_use]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::UnexpectedStatus { .. })
    }

    /// Returns `true` if the operation was cancelled by a disconnect.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// ============================================================================
// Tests
// ============================================================================
