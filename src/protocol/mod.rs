//! RPC wire protocol.
//!
//! Requests and replies travel as JSON text frames over one WebSocket.
//! Replies may arrive in any order; each carries the `callback_id` of the
//! request it answers.
//!
//! # Protocol Overview
//!
//! | Message | Direction | Purpose |
//! |---------|-----------|---------|
//! | `Request` | Client → Server | `method`, `path`, `callback_id`, `data` |
//! | `Response` | Server → Client | `code`, `callback_id`, `error`, payload |
//!
//! # Status Codes
//!
//! | Range | Outcome |
//! |-------|---------|
//! | 200-399 | Success, raw reply handed back |
//! | 400-499 | [`Error::ClientError`](crate::Error::ClientError) |
//! | 500-599 | [`Error::ServerError`](crate::Error::ServerError) |
//! | other | [`Error::UnexpectedStatus`](crate::Error::UnexpectedStatus) |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `envelope` | Request and Response types |
//! | `ledger` | Pending-request correlation |

// ============================================================================
// Submodules
// ============================================================================

/// Request and Response envelopes.
pub mod envelope;

/// Pending-request ledger.
pub mod ledger;

// ============================================================================
// Re-exports
// ============================================================================

pub use envelope::{ErrorBody, Method, Request, Response, StatusClass, decode_data};
pub use ledger::{CorrelationLedger, IdSource, MAX_ID_ATTEMPTS, Slot};
