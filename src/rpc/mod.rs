//! Request/response layer.
//!
//! Correlates JSON requests with their replies over one [`WebSocket`].
//!
//! [`WebSocket`]: crate::socket::WebSocket
//!
//! # Data Flow
//!
//! ```text
//! caller ──► envelope (attach callback_id) ──► WebSocket::send ──► network
//!
//! network ──► WebSocket::receive ──► receive loop (extract callback_id)
//!         ──► ledger (resolve slot) ──► caller
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Request/response connection.
pub mod connection;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{DEFAULT_REQUEST_TIMEOUT, RpcConnection};
