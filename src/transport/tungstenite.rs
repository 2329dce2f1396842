//! Network transport backed by `tokio-tungstenite`.
//!
//! # Event Loop
//!
//! [`Transport::resume`] spawns one task per transport that:
//!
//! 1. Asks the [`TrustAuthority`] how to treat `wss://` hosts
//! 2. Performs the WebSocket handshake
//! 3. Reports [`TransportEvent::Ready`] (or `Failed`)
//! 4. Pumps inbound data frames into a queue drained by `receive`
//!
//! The pump notices a peer close immediately, even when nobody is
//! currently receiving, and reports it as [`TransportEvent::Closed`].

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async_tls_with_config};
use tracing::{debug, trace, warn};
use url::Url;

use crate::error::{Error, Result};

use super::trust::{DefaultTrust, TrustAuthority, TrustDecision};
use super::{CloseCode, Message, Transport, TransportEvent, TransportEvents, TransportFactory};

// ============================================================================
// Types
// ============================================================================

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, WsMessage>;
type WsSource = SplitStream<WsStream>;
type Inbound = mpsc::UnboundedReceiver<Result<Message>>;
type InboundTx = mpsc::UnboundedSender<Result<Message>>;

/// Close code reported when the peer closes without a status.
const NO_STATUS_RECEIVED: u16 = 1005;

// ============================================================================
// TungsteniteTransport
// ============================================================================

/// A single-use client transport for one WebSocket URL.
pub struct TungsteniteTransport {
    /// Endpoint to connect to.
    url: Url,
    /// Decides TLS handling for `wss://` endpoints.
    trust: Arc<dyn TrustAuthority>,
    /// Write half, present once the handshake completed.
    writer: Arc<AsyncMutex<Option<WsSink>>>,
    /// Queue filled by the pump task.
    inbound: AsyncMutex<Inbound>,
    /// Producer half of `inbound`, moved into the pump on resume.
    inbound_tx: Mutex<Option<InboundTx>>,
    /// Close code, `Invalid` while open.
    close_code: Arc<Mutex<CloseCode>>,
    /// Lifecycle channel, set on resume.
    events: Mutex<Option<TransportEvents>>,
    /// Connect + pump task.
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TungsteniteTransport {
    /// Creates a transport for `url` using default TLS handling.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self::with_trust(url, Arc::new(DefaultTrust))
    }

    /// Creates a transport for `url` consulting `trust` for TLS decisions.
    #[must_use]
    pub fn with_trust(url: Url, trust: Arc<dyn TrustAuthority>) -> Self {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();

        Self {
            url,
            trust,
            writer: Arc::new(AsyncMutex::new(None)),
            inbound: AsyncMutex::new(inbound),
            inbound_tx: Mutex::new(Some(inbound_tx)),
            close_code: Arc::new(Mutex::new(CloseCode::Invalid)),
            events: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Returns the endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Resolves TLS handling and performs the handshake.
    async fn open(url: &Url, trust: &dyn TrustAuthority) -> Result<(WsStream, Option<String>)> {
        let connector = if url.scheme() == "wss" {
            let host = url.host_str().unwrap_or_default();
            match trust.evaluate(host) {
                TrustDecision::PerformDefaultHandling => None,
                TrustDecision::UseConnector(connector) => {
                    debug!(host, "Using caller-supplied TLS connector");
                    Some(connector)
                }
                TrustDecision::Reject => return Err(Error::tls(host)),
            }
        } else {
            None
        };

        let (stream, response) =
            connect_async_tls_with_config(url.as_str(), None, false, connector).await?;

        let protocol = response
            .headers()
            .get("sec-websocket-protocol")
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        Ok((stream, protocol))
    }

    /// Forwards inbound data frames until the connection ends.
    async fn pump(
        mut source: WsSource,
        inbound: InboundTx,
        close_code: Arc<Mutex<CloseCode>>,
        events: TransportEvents,
    ) {
        loop {
            match source.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    trace!(len = text.len(), "Text frame received");
                    if inbound
                        .send(Ok(Message::Text(text.as_str().to_owned())))
                        .is_err()
                    {
                        break;
                    }
                }

                Some(Ok(WsMessage::Binary(data))) => {
                    trace!(len = data.len(), "Binary frame received");
                    if inbound.send(Ok(Message::Binary(data))).is_err() {
                        break;
                    }
                }

                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => {
                            let reason = (!frame.reason.is_empty())
                                .then(|| Bytes::copy_from_slice(frame.reason.as_bytes()));
                            (CloseCode::from(u16::from(frame.code)), reason)
                        }
                        None => (CloseCode::from(NO_STATUS_RECEIVED), None),
                    };

                    debug!(%code, "WebSocket closed by remote");
                    *close_code.lock() = code;
                    let _ = inbound.send(Err(Error::ConnectionClosed));
                    let _ = events.send(TransportEvent::Closed { code, reason });
                    break;
                }

                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    *close_code.lock() = CloseCode::Abnormal;
                    let message = e.to_string();
                    let _ = inbound.send(Err(Error::connection(message.clone())));
                    let _ = events.send(TransportEvent::Failed { message });
                    break;
                }

                None => {
                    debug!("WebSocket stream ended");
                    *close_code.lock() = CloseCode::Abnormal;
                    let _ = inbound.send(Err(Error::ConnectionClosed));
                    let _ = events.send(TransportEvent::Closed {
                        code: CloseCode::Abnormal,
                        reason: None,
                    });
                    break;
                }

                // Ping, Pong and raw frames are handled by tungstenite
                Some(Ok(_)) => {}
            }
        }
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    fn resume(&self, events: TransportEvents) {
        let Some(inbound) = self.inbound_tx.lock().take() else {
            warn!(url = %self.url, "Transport resumed twice");
            return;
        };

        *self.events.lock() = Some(events.clone());

        let url = self.url.clone();
        let trust = Arc::clone(&self.trust);
        let writer = Arc::clone(&self.writer);
        let close_code = Arc::clone(&self.close_code);

        let handle = tokio::spawn(async move {
            let (stream, protocol) = match Self::open(&url, trust.as_ref()).await {
                Ok(opened) => opened,
                Err(e) => {
                    debug!(%url, error = %e, "WebSocket handshake failed");
                    *close_code.lock() = CloseCode::Abnormal;
                    let _ = events.send(TransportEvent::Failed {
                        message: e.to_string(),
                    });
                    return;
                }
            };

            let (sink, source) = stream.split();
            *writer.lock().await = Some(sink);

            debug!(%url, ?protocol, "WebSocket handshake completed");
            let _ = events.send(TransportEvent::Ready { protocol });

            Self::pump(source, inbound, close_code, events).await;
        });

        *self.task.lock() = Some(handle);
    }

    async fn receive(&self) -> Result<Message> {
        let mut inbound = self.inbound.lock().await;
        inbound.recv().await.unwrap_or(Err(Error::ConnectionClosed))
    }

    async fn send(&self, message: Message) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(Error::NotConnected)?;

        let frame = match message {
            Message::Text(text) => WsMessage::text(text),
            Message::Binary(data) => WsMessage::binary(data),
        };

        sink.send(frame).await?;
        Ok(())
    }

    fn cancel(&self, code: CloseCode, reason: Option<Bytes>) {
        {
            let mut current = self.close_code.lock();
            if *current == CloseCode::Invalid {
                *current = code;
            }
        }

        if let Some(task) = self.task.lock().take() {
            task.abort();
        }

        let events = self.events.lock().take();
        let writer = Arc::clone(&self.writer);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // Without a runtime the sink is dropped with the transport.
            if let Some(events) = events {
                let _ = events.send(TransportEvent::Cancelled);
            }
            return;
        };

        runtime.spawn(async move {
            if let Some(mut sink) = writer.lock().await.take()
                && code != CloseCode::Abnormal
            {
                let frame = CloseFrame {
                    code: u16::from(code).into(),
                    reason: reason
                        .map(|r| String::from_utf8_lossy(&r).into_owned())
                        .unwrap_or_default()
                        .into(),
                };
                if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                    debug!(error = %e, "Failed to send close frame");
                }
                let _ = sink.close().await;
            }

            if let Some(events) = events {
                let _ = events.send(TransportEvent::Cancelled);
            }
        });
    }

    fn close_code(&self) -> CloseCode {
        *self.close_code.lock()
    }
}

impl Drop for TungsteniteTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

// ============================================================================
// TungsteniteFactory
// ============================================================================

/// Builds a [`TungsteniteTransport`] for a fixed endpoint.
#[derive(Clone)]
pub struct TungsteniteFactory {
    url: Url,
    trust: Arc<dyn TrustAuthority>,
}

impl TungsteniteFactory {
    /// Creates a factory for `url` with the given trust authority.
    #[must_use]
    pub fn new(url: Url, trust: Arc<dyn TrustAuthority>) -> Self {
        Self { url, trust }
    }

    /// Returns the endpoint URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl TransportFactory for TungsteniteFactory {
    fn make_transport(&self) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(TungsteniteTransport::with_trust(
            self.url.clone(),
            Arc::clone(&self.trust),
        )))
    }
}

// ============================================================================
// Tests
// ============================================================================
