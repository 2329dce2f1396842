//! Duplex RPC - Reconnecting WebSocket transport with request correlation.
//!
//! This library provides a WebSocket client built around an explicit
//! connection state machine, plus a JSON request/response layer on top.
//!
//! # Architecture
//!
//! The crate is layered:
//!
//! - **Transport**: a single-use object that speaks WebSocket framing
//! - **Socket**: the state machine owning the current transport
//! - **RPC**: tags requests with a callback id and routes replies back
//!
//! Key design principles:
//!
//! - Every `connect` uses a brand-new transport
//! - `disconnect` resumes every suspended caller, nothing hangs
//! - Replies may arrive in any order; the ledger resolves each exactly once
//! - Reconnects are opt-in and serialized per socket
//!
//! # Quick Start
//!
//! ```no_run
//! use duplex_rpc::{Result, RpcConnection, WebSocket};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     // Build a socket for the RPC endpoint
//!     let socket = WebSocket::builder()
//!         .url("ws://127.0.0.1:5601/api/v1")
//!         .build()?;
//!
//!     // Connect and issue a request
//!     let rpc = RpcConnection::new(socket);
//!     rpc.connect().await?;
//!     let reply = rpc.get("/status").await?;
//!     println!("Reply: {}", String::from_utf8_lossy(&reply));
//!
//!     rpc.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`socket`] | [`WebSocket`] state machine, reconnect, stream |
//! | [`rpc`] | [`RpcConnection`] request/response layer |
//! | [`protocol`] | Envelopes and the correlation ledger |
//! | [`transport`] | Transport abstraction and the network transport |
//! | [`server`] | [`LoopbackServer`] for local peers and tests |
//! | [`config`] | Socket builder and endpoint helpers |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |

// ============================================================================
// Modules
// ============================================================================

/// Socket configuration.
///
/// Use [`WebSocket::builder()`] to create a configured socket.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
///
/// Newtype wrappers prevent mixing incompatible IDs at compile time.
pub mod identifiers;

/// RPC wire protocol.
///
/// Request/response envelopes and pending-request correlation.
pub mod protocol;

/// Request/response layer.
pub mod rpc;

/// Loopback WebSocket server.
pub mod server;

/// WebSocket client.
///
/// - [`WebSocket`] - connection state machine
/// - [`MessageStream`] - pull-based receive
/// - [`AutoReconnect`] - retry policy
pub mod socket;

/// Transport layer.
///
/// The [`Transport`] seam between the state machine and the network.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Socket types
pub use socket::{AutoReconnect, ConnectionState, MessageStream, StateObserver, WebSocket};

// Configuration
pub use config::{DEFAULT_PATH, DEFAULT_PORT, SocketBuilder, SocketConfig, endpoint_url};

// RPC types
pub use protocol::{CorrelationLedger, Method, StatusClass};
pub use rpc::{DEFAULT_REQUEST_TIMEOUT, RpcConnection};

// Server types
pub use server::{Broadcast, Echo, InterfaceType, LoopbackServer, MessageHandler, ServerConfig};

// Transport types
pub use transport::{
    CloseCode, Message, Transport, TransportEvent, TransportFactory, TrustAuthority,
    TrustDecision, TrustedHost,
};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{CallbackId, ClientId};
