//! Loopback WebSocket server.
//!
//! A restartable server for local peers and integration tests. Each
//! accepted client gets a [`ClientId`](crate::ClientId); what happens to its
//! messages is decided by a [`MessageHandler`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            LoopbackServer                │
//! │  accept loop ──► client task (per peer)  │
//! │                    │                     │
//! │                    ▼                     │
//! │             MessageHandler               │
//! │                    │                     │
//! │                    ▼                     │
//! │  ClientSet { ClientId → outbound queue } │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `loopback` | [`LoopbackServer`] lifecycle and accept loop |
//! | `config` | [`ServerConfig`], [`InterfaceType`], [`TlsAcceptor`] |
//! | `handler` | [`MessageHandler`], [`Echo`], [`Broadcast`] |
//! | `clients` | [`ClientSet`] registry |

// ============================================================================
// Submodules
// ============================================================================

/// Server lifecycle and accept loop.
pub mod loopback;

/// Server configuration.
pub mod config;

/// Message handlers.
pub mod handler;

/// Connected-client registry.
pub mod clients;

// ============================================================================
// Re-exports
// ============================================================================

pub use self::clients::ClientSet;
pub use self::config::{DEFAULT_HOST, InterfaceType, ServerConfig, ServerStream, TlsAcceptor};
pub use self::handler::{Broadcast, Echo, MessageHandler};
pub use self::loopback::LoopbackServer;
