//! TLS trust decisions.
//!
//! Certificate policy is not hardcoded. Before opening a `wss://`
//! connection the transport asks a [`TrustAuthority`] what to do with the
//! host, and the authority either defers to the platform's default
//! validation, supplies its own TLS connector, or refuses the host.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio_tungstenite::Connector;

// ============================================================================
// TrustDecision
// ============================================================================

/// Outcome of a trust evaluation for one host.
pub enum TrustDecision {
    /// Validate the server certificate against the native root store.
    PerformDefaultHandling,
    /// Connect with this connector, bypassing default validation.
    UseConnector(Connector),
    /// Do not connect at all.
    Reject,
}

impl fmt::Debug for TrustDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerformDefaultHandling => f.write_str("PerformDefaultHandling"),
            Self::UseConnector(_) => f.write_str("UseConnector(..)"),
            Self::Reject => f.write_str("Reject"),
        }
    }
}

// ============================================================================
// TrustAuthority
// ============================================================================

/// Decides how TLS connections to a host are validated.
pub trait TrustAuthority: Send + Sync + 'static {
    /// Evaluates the TLS challenge for `host`.
    fn evaluate(&self, host: &str) -> TrustDecision;
}

/// Authority that always uses default platform validation.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTrust;

impl TrustAuthority for DefaultTrust {
    fn evaluate(&self, _host: &str) -> TrustDecision {
        TrustDecision::PerformDefaultHandling
    }
}

/// Authority that trusts one designated host through a custom connector.
///
/// Typically used for a local service with a self-signed certificate.
/// Every other host gets default handling.
pub struct TrustedHost {
    host: String,
    connector: Connector,
}

impl TrustedHost {
    /// Creates an authority for `host` that connects with `connector`.
    #[must_use]
    pub fn new(host: impl Into<String>, connector: Connector) -> Self {
        Self {
            host: host.into(),
            connector,
        }
    }

    /// Returns the designated host.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl fmt::Debug for TrustedHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustedHost")
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl TrustAuthority for TrustedHost {
    fn evaluate(&self, host: &str) -> TrustDecision {
        if host.eq_ignore_ascii_case(&self.host) {
            TrustDecision::UseConnector(self.connector.clone())
        } else {
            TrustDecision::PerformDefaultHandling
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
