//! WebSocket client.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `connection` | [`WebSocket`] connection state machine |
//! | `state` | [`ConnectionState`] and observers |
//! | `reconnect` | [`AutoReconnect`] retry policy |
//! | `stream` | [`MessageStream`] pull-based receive |
//!
//! # Example
//!
//! ```ignore
//! use duplex_rpc::{AutoReconnect, WebSocket};
//! use futures_util::StreamExt;
//! use std::time::Duration;
//!
//! let socket = WebSocket::builder()
//!     .endpoint("127.0.0.1", 5601)
//!     .auto_reconnect(AutoReconnect::enabled(3, Duration::from_secs(1)))
//!     .build()?;
//!
//! socket.connect().await?;
//! let mut messages = socket.stream();
//! while let Some(payload) = messages.next().await {
//!     println!("{} bytes", payload?.len());
//! }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Connection state machine.
mod connection;

/// Connection state.
pub mod state;

/// Automatic reconnection.
pub mod reconnect;

/// Message stream.
pub mod stream;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::connection::WebSocket;
pub use self::reconnect::{AutoReconnect, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
pub use self::state::{ConnectionState, StateObserver};
pub use self::stream::MessageStream;
