//! Request and Response envelopes.
//!
//! Every RPC message is a JSON text frame. The client tags each request
//! with a `callback_id`; the server echoes it in the reply together with an
//! HTTP-like status `code`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identifiers::CallbackId;

// ============================================================================
// Method
// ============================================================================

/// Request verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    /// Read a resource.
    #[serde(rename = "GET")]
    Get,
    /// Submit data to a resource.
    #[serde(rename = "POST")]
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// An outbound request.
///
/// # Format
///
/// ```json
/// {
///   "method": "GET",
///   "path": "/status",
///   "callback_id": 1234,
///   "data": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request<T = Value> {
    /// Request verb.
    pub method: Method,
    /// Target resource.
    pub path: String,
    /// Correlation id echoed by the reply.
    pub callback_id: CallbackId,
    /// Request body.
    pub data: T,
}

impl<T: Serialize> Request<T> {
    /// Creates a request.
    #[inline]
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, callback_id: CallbackId, data: T) -> Self {
        Self {
            method,
            path: path.into(),
            callback_id,
            data,
        }
    }

    /// Serializes the request to its JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `data` cannot be serialized.
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ============================================================================
// ErrorBody
// ============================================================================

/// Error details of a failed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable description.
    #[serde(default)]
    pub message: String,
}

// ============================================================================
// Response
// ============================================================================

/// The routing part of an inbound reply.
///
/// Extra fields are ignored; the full payload stays available to the caller
/// as raw bytes.
///
/// # Format
///
/// ```json
/// {
///   "code": 200,
///   "callback_id": 1234,
///   "error": null,
///   "data": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Status code.
    pub code: i64,
    /// Correlation id of the request.
    pub callback_id: i64,
    /// Error details, if any.
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

impl Response {
    /// Parses the routing fields of a reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if `payload` is not a valid envelope.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Correlation id, `None` if outside the id space.
    #[inline]
    #[must_use]
    pub fn callback_id(&self) -> Option<CallbackId> {
        CallbackId::from_wire(self.callback_id)
    }

    /// Status class of [`Response::code`].
    #[inline]
    #[must_use]
    pub fn status(&self) -> StatusClass {
        StatusClass::from_code(self.code)
    }

    /// Error message, empty if none was given.
    #[inline]
    #[must_use]
    pub fn error_message(&self) -> &str {
        self.error.as_ref().map_or("", |e| e.message.as_str())
    }

    /// Maps the status to the caller's outcome, keeping `payload` on success.
    ///
    /// # Errors
    ///
    /// - [`Error::ClientError`] for 400-499
    /// - [`Error::ServerError`] for 500-599
    /// - [`Error::UnexpectedStatus`] for anything outside 200-599
    pub fn into_result<P>(self, payload: P) -> Result<P> {
        match self.status() {
            StatusClass::Success => Ok(payload),
            StatusClass::ClientError => Err(Error::client_error(self.code, self.error_message())),
            StatusClass::ServerError => Err(Error::server_error(self.code, self.error_message())),
            StatusClass::Unexpected => Err(Error::unexpected_status(self.code)),
        }
    }
}

/// Decodes the `data` field of a successful reply.
///
/// A missing field decodes as JSON `null`.
///
/// # Errors
///
/// Returns [`Error::Json`] if the payload or its `data` does not match `T`.
pub fn decode_data<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    #[derive(Deserialize)]
    struct Envelope<T> {
        data: Option<T>,
    }

    let envelope: Envelope<Value> = serde_json::from_slice(payload)?;
    Ok(serde_json::from_value(envelope.data.unwrap_or(Value::Null))?)
}

// ============================================================================
// StatusClass
// ============================================================================

/// Classification of a reply status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusClass {
    /// 200-399.
    Success,
    /// 400-499.
    ClientError,
    /// 500-599.
    ServerError,
    /// Anything else.
    Unexpected,
}

impl StatusClass {
    /// Classifies a status code.
    #[inline]
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            200..=399 => Self::Success,
            400..=499 => Self::ClientError,
            500..=599 => Self::ServerError,
            _ => Self::Unexpected,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
