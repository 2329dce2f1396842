//! Type-safe identifiers.
//!
//! Newtype wrappers keep correlation ids and server-side client ids
//! from being mixed up with plain integers.
//!
//! | Type | Wraps | Scope |
//! |------|-------|-------|
//! | [`CallbackId`] | `u32` in `[0, 2^31)` | One pending request on one connection |
//! | [`ClientId`] | `Uuid` v4 | One accepted client of a loopback server |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, de};
use uuid::Uuid;

// ============================================================================
// CallbackId
// ============================================================================

/// Correlation id attached to an outbound request and echoed in its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct CallbackId(u32);

impl CallbackId {
    /// Exclusive upper bound of the id space (`2^31`).
    pub const LIMIT: u32 = 1 << 31;

    /// Creates an id, folding the value into `[0, 2^31)`.
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value % Self::LIMIT)
    }

    /// Converts a wire value, returning `None` when it is outside the id space.
    #[inline]
    #[must_use]
    pub fn from_wire(value: i64) -> Option<Self> {
        u32::try_from(value)
            .ok()
            .filter(|v| *v < Self::LIMIT)
            .map(Self)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl<'de> Deserialize<'de> for CallbackId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = i64::deserialize(deserializer)?;
        Self::from_wire(value).ok_or_else(|| {
            de::Error::custom(format!("callback id {value} outside [0, {})", Self::LIMIT))
        })
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// ClientId
// ============================================================================

/// Identifier of a client accepted by a [`LoopbackServer`](crate::server::LoopbackServer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    /// Generates a new random client id.
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[inline]
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Tests
// ============================================================================
