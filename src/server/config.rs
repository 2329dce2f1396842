//! Loopback server configuration.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

use super::handler::{Echo, MessageHandler};

// ============================================================================
// Constants
// ============================================================================

/// Default bind address (localhost).
pub const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

// ============================================================================
// ServerStream / TlsAcceptor
// ============================================================================

/// A byte stream a WebSocket can be served over.
pub trait ServerStream: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> ServerStream for T {}

/// Wraps accepted TCP connections in transport encryption.
///
/// The server performs the WebSocket upgrade over whatever stream the
/// acceptor returns.
#[async_trait]
pub trait TlsAcceptor: Send + Sync + 'static {
    /// Performs the server side of the TLS handshake.
    async fn accept(&self, stream: TcpStream) -> Result<Box<dyn ServerStream>>;
}

// ============================================================================
// InterfaceType
// ============================================================================

/// Which network interfaces a server may listen on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterfaceType {
    /// Any interface.
    Any,
    /// Loopback only; other hosts are refused at start.
    #[default]
    Loopback,
}

impl InterfaceType {
    /// Returns `true` if `host` may be bound.
    #[inline]
    #[must_use]
    pub fn permits(self, host: IpAddr) -> bool {
        match self {
            Self::Any => true,
            Self::Loopback => host.is_loopback(),
        }
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

/// Settings of a [`LoopbackServer`](super::LoopbackServer).
#[derive(Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub host: IpAddr,
    /// Bind port, 0 for an ephemeral one.
    pub port: u16,
    /// Interface restriction.
    pub interface: InterfaceType,
    /// Transport encryption, plain TCP if `None`.
    pub tls: Option<Arc<dyn TlsAcceptor>>,
    /// Message handler.
    pub handler: Arc<dyn MessageHandler>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST,
            port: 0,
            interface: InterfaceType::default(),
            tls: None,
            handler: Arc::new(Echo),
        }
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("interface", &self.interface)
            .field("tls", &self.tls.is_some())
            .finish_non_exhaustive()
    }
}

impl ServerConfig {
    /// Creates the default configuration: echo on `127.0.0.1`, ephemeral port.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Sets the bind port.
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the interface restriction.
    #[inline]
    #[must_use]
    pub fn interface(mut self, interface: InterfaceType) -> Self {
        self.interface = interface;
        self
    }

    /// Enables transport encryption.
    #[inline]
    #[must_use]
    pub fn tls(mut self, acceptor: Arc<dyn TlsAcceptor>) -> Self {
        self.tls = Some(acceptor);
        self
    }

    /// Sets the message handler.
    #[inline]
    #[must_use]
    pub fn handler(mut self, handler: impl MessageHandler) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// Checks the configuration before binding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the host is not allowed by the interface.
    pub fn validate(&self) -> Result<()> {
        if !self.interface.permits(self.host) {
            return Err(Error::config(format!(
                "Host {} is not a loopback address. Use InterfaceType::Any to listen on it.",
                self.host
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
