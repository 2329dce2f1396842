//! Socket configuration.
//!
//! Provides a fluent API for configuring and creating [`WebSocket`] instances.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use duplex_rpc::{AutoReconnect, WebSocket};
//!
//! # fn example() -> duplex_rpc::Result<()> {
//! let socket = WebSocket::builder()
//!     .url("ws://127.0.0.1:5601/api/v1")
//!     .connect_timeout(Duration::from_secs(10))
//!     .auto_reconnect(AutoReconnect::enabled(3, Duration::from_secs(1)))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::socket::{AutoReconnect, ConnectionState, StateObserver, WebSocket};
use crate::transport::{DefaultTrust, TransportFactory, TrustAuthority, TungsteniteFactory};

// ============================================================================
// Constants
// ============================================================================

/// Default port of the RPC endpoint.
pub const DEFAULT_PORT: u16 = 5601;

/// Default path of the RPC endpoint.
pub const DEFAULT_PATH: &str = "/api/v1";

/// Default time allowed for the opening handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// endpoint_url
// ============================================================================

/// Builds `scheme://host:port/path`.
///
/// # Errors
///
/// Returns [`Error::Config`] if the result is not a valid `ws`/`wss` URL.
pub fn endpoint_url(scheme: &str, host: &str, port: u16, path: &str) -> Result<Url> {
    let path = path.trim_start_matches('/');
    let raw = format!("{scheme}://{host}:{port}/{path}");
    parse_ws_url(&raw)
}

/// Parses and validates a WebSocket URL.
fn parse_ws_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::config(format!("Invalid URL '{raw}': {e}")))?;

    match url.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(Error::config(format!(
                "Unsupported scheme '{other}' in '{raw}', expected ws or wss"
            )));
        }
    }

    if url.host_str().is_none() {
        return Err(Error::config(format!("URL '{raw}' has no host")));
    }

    Ok(url)
}

/// Whole milliseconds of `duration`, saturating at `u64::MAX`.
#[inline]
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// SocketConfig
// ============================================================================

/// Settings fixed for the lifetime of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketConfig {
    /// Time allowed for `connect` when no explicit timeout is given.
    pub connect_timeout: Duration,
    /// Reconnect policy.
    pub auto_reconnect: AutoReconnect,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auto_reconnect: AutoReconnect::default(),
        }
    }
}

// ============================================================================
// SocketBuilder
// ============================================================================

/// Builder for configuring a [`WebSocket`] instance.
///
/// Use [`WebSocket::builder()`] to create a new builder. Either an endpoint
/// URL or a custom [`TransportFactory`] is required.
#[derive(Default, Clone)]
pub struct SocketBuilder {
    /// Endpoint URL, unparsed.
    url: Option<String>,
    /// TLS trust for `wss` endpoints.
    trust: Option<Arc<dyn TrustAuthority>>,
    /// Custom transport source.
    factory: Option<Arc<dyn TransportFactory>>,
    config: SocketConfig,
    observer: Option<StateObserver>,
}

impl fmt::Debug for SocketBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketBuilder")
            .field("url", &self.url)
            .field("custom_trust", &self.trust.is_some())
            .field("custom_factory", &self.factory.is_some())
            .field("config", &self.config)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

// ============================================================================
// SocketBuilder Implementation
// ============================================================================

impl SocketBuilder {
    /// Creates a new builder with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the endpoint URL.
    ///
    /// # Arguments
    ///
    /// * `url` - `ws://` or `wss://` URL (e.g., "ws://127.0.0.1:5601/api/v1")
    #[inline]
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the endpoint to `ws://host:port` with the default path.
    #[inline]
    #[must_use]
    pub fn endpoint(mut self, host: &str, port: u16) -> Self {
        self.url = Some(format!("ws://{host}:{port}{DEFAULT_PATH}"));
        self
    }

    /// Sets the authority consulted for TLS trust on `wss` endpoints.
    #[inline]
    #[must_use]
    pub fn trust(mut self, trust: Arc<dyn TrustAuthority>) -> Self {
        self.trust = Some(trust);
        self
    }

    /// Replaces the network transport.
    ///
    /// The URL becomes optional and is only kept for diagnostics.
    #[inline]
    #[must_use]
    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Sets the default time allowed for `connect`.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Sets the reconnect policy.
    #[inline]
    #[must_use]
    pub fn auto_reconnect(mut self, auto_reconnect: AutoReconnect) -> Self {
        self.config.auto_reconnect = auto_reconnect;
        self
    }

    /// Registers a callback invoked on every state transition.
    #[inline]
    #[must_use]
    pub fn observer(mut self, observer: impl Fn(&ConnectionState) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Returns the settings collected so far.
    #[inline]
    #[must_use]
    pub fn config(&self) -> SocketConfig {
        self.config
    }

    /// Builds the socket with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if neither URL nor transport factory is set
    /// - [`Error::Config`] if the URL is invalid or not `ws`/`wss`
    /// - [`Error::Config`] if the connect timeout is zero
    pub fn build(self) -> Result<WebSocket> {
        self.validate_timeout()?;
        let url = self.url.as_deref().map(parse_ws_url).transpose()?;

        let factory = match (self.factory, &url) {
            (Some(factory), _) => factory,
            (None, Some(url)) => {
                let trust = self.trust.unwrap_or_else(|| Arc::new(DefaultTrust));
                Arc::new(TungsteniteFactory::new(url.clone(), trust))
            }
            (None, None) => {
                return Err(Error::config(
                    "Endpoint URL is required. Use .url() or .endpoint() to set it.\n\
                     Example: WebSocket::builder().url(\"ws://127.0.0.1:5601/api/v1\")",
                ));
            }
        };

        Ok(WebSocket::new(
            factory,
            url,
            self.config.connect_timeout,
            self.config.auto_reconnect,
            self.observer,
        ))
    }
}

// ============================================================================
// Validation
// ============================================================================

impl SocketBuilder {
    /// Validates the connect timeout.
    fn validate_timeout(&self) -> Result<()> {
        if self.config.connect_timeout.is_zero() {
            return Err(Error::config("Connect timeout must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
