//! Request/response connection and receive loop.
//!
//! [`RpcConnection`] owns one [`WebSocket`], one [`CorrelationLedger`] and
//! one receive-loop task.
//!
//! # Receive Loop
//!
//! The loop pulls every inbound frame off the socket and:
//!
//! - Parses the routing fields of the reply
//! - Maps the status code to the caller's outcome
//! - Resolves the pending slot registered under the `callback_id`
//!
//! When the session a request was sent on ends, or the loop itself ends,
//! the pending request fails.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

use crate::config;
use crate::error::{Error, Result};
use crate::protocol::{CorrelationLedger, Method, Request, Response, StatusClass, decode_data};
use crate::socket::WebSocket;

// ============================================================================
// Constants
// ============================================================================

/// Default time a request waits for its reply.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// RpcInner
// ============================================================================

struct RpcInner {
    socket: WebSocket,
    ledger: Arc<CorrelationLedger>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for RpcInner {
    fn drop(&mut self) {
        if let Some(task) = self.receive_task.get_mut().take() {
            task.abort();
        }
        self.ledger.cancel_all(|| Error::Cancelled);
    }
}

// ============================================================================
// RpcConnection
// ============================================================================

/// Request/response client over one [`WebSocket`].
///
/// Cheap to clone; clones share the socket and the pending requests.
///
/// # Example
///
/// ```ignore
/// use duplex_rpc::{RpcConnection, WebSocket};
///
/// let socket = WebSocket::builder().endpoint("127.0.0.1", 5601).build()?;
/// let rpc = RpcConnection::new(socket);
///
/// rpc.connect().await?;
/// let reply = rpc.get("/status").await?;
/// rpc.disconnect();
/// ```
#[derive(Clone)]
pub struct RpcConnection {
    inner: Arc<RpcInner>,
}

impl std::fmt::Debug for RpcConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcConnection")
            .field("socket", &self.inner.socket)
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl RpcConnection {
    /// Wraps a socket. The socket is connected by [`RpcConnection::connect`].
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self::with_ledger(socket, CorrelationLedger::new())
    }

    /// Wraps a socket, using `ledger` for pending requests.
    #[must_use]
    pub fn with_ledger(socket: WebSocket, ledger: CorrelationLedger) -> Self {
        Self {
            inner: Arc::new(RpcInner {
                socket,
                ledger: Arc::new(ledger),
                receive_task: Mutex::new(None),
            }),
        }
    }

    /// Returns the underlying socket.
    #[inline]
    #[must_use]
    pub fn socket(&self) -> &WebSocket {
        &self.inner.socket
    }

    /// Returns `true` if the socket is connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.socket.is_connected()
    }

    /// Returns the number of pending requests.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.ledger.len()
    }
}

// ============================================================================
// RpcConnection - Lifecycle
// ============================================================================

impl RpcConnection {
    /// Connects the socket and starts the receive loop.
    ///
    /// # Errors
    ///
    /// Any error of [`WebSocket::connect`].
    pub async fn connect(&self) -> Result<()> {
        self.inner.socket.connect().await?;

        let task = tokio::spawn(Self::run_receive_loop(
            self.inner.socket.clone(),
            Arc::clone(&self.inner.ledger),
        ));

        if let Some(previous) = self.inner.receive_task.lock().replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Disconnects and fails every pending request with [`Error::Cancelled`].
    ///
    /// Idempotent.
    pub fn disconnect(&self) {
        self.inner.socket.disconnect();

        if let Some(task) = self.inner.receive_task.lock().take() {
            task.abort();
        }
        self.inner.ledger.cancel_all(|| Error::Cancelled);
    }

    /// Pulls replies until the socket stops delivering.
    ///
    /// Requests are bound to the session they were sent on. When that
    /// session ends, their slots fail even if a reconnect replaces it.
    async fn run_receive_loop(socket: WebSocket, ledger: Arc<CorrelationLedger>) {
        let mut states = socket.subscribe();
        let mut session = socket.connected_generation();

        let reason = loop {
            let receive = socket.receive();
            tokio::pin!(receive);

            let result = loop {
                tokio::select! {
                    result = &mut receive => break result,
                    Ok(()) = states.changed() => {
                        let current = socket.connected_generation();
                        if current != session {
                            if let Some(ended) = session {
                                let failed = ledger.cancel_all(|| Self::teardown_error(&socket));
                                debug!(
                                    generation = ended,
                                    failed,
                                    "Session ended, pending requests failed"
                                );
                            }
                            session = current;
                        }
                    }
                }
            };

            match result {
                Ok(payload) => Self::handle_reply(&ledger, payload),
                Err(e) => break e,
            }
        };

        debug!(reason = %reason, "Receive loop terminated");

        let cancelled = matches!(reason, Error::Cancelled | Error::NotConnected);
        ledger.cancel_all(|| {
            if cancelled {
                Error::Cancelled
            } else {
                Error::ConnectionClosed
            }
        });
    }

    /// Error for requests whose session ended.
    fn teardown_error(socket: &WebSocket) -> Error {
        if socket.may_reconnect() {
            Error::ConnectionClosed
        } else {
            Error::Cancelled
        }
    }

    /// Routes one inbound frame to its pending request.
    fn handle_reply(ledger: &CorrelationLedger, payload: Bytes) {
        let response = match Response::parse(&payload) {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, len = payload.len(), "Failed to parse reply");
                return;
            }
        };

        let Some(id) = response.callback_id() else {
            warn!(callback_id = response.callback_id, "Reply with invalid callback id");
            return;
        };

        let code = response.code;
        if response.status() == StatusClass::Unexpected {
            error!(%id, code, "Unexpected status code");
        }

        let resolved = match response.into_result(payload) {
            Ok(payload) => ledger.resume_returning(id, payload),
            Err(e) => ledger.resume_throwing(id, e),
        };

        if resolved {
            trace!(%id, code, "Reply routed");
        } else {
            warn!(%id, code, "Reply for unknown request");
        }
    }
}

// ============================================================================
// RpcConnection - Requests
// ============================================================================

impl RpcConnection {
    /// Sends a request and waits for the reply with the default timeout (30s).
    ///
    /// Returns the raw reply on a 2xx/3xx status.
    ///
    /// # Errors
    ///
    /// - [`Error::ClientError`] / [`Error::ServerError`] for 4xx / 5xx replies
    /// - [`Error::UnexpectedStatus`] for any other status
    /// - [`Error::RequestTimeout`] if no reply arrives in time
    /// - [`Error::Cancelled`] if disconnected meanwhile
    pub async fn request<T: Serialize>(&self, method: Method, path: &str, data: T) -> Result<Bytes> {
        self.request_with_timeout(method, path, data, DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    /// Sends a request and waits for the reply with a custom timeout.
    ///
    /// # Arguments
    ///
    /// * `method` - Request verb
    /// * `path` - Target resource
    /// * `data` - Request body
    /// * `request_timeout` - Maximum time to wait for the reply
    ///
    /// # Errors
    ///
    /// See [`RpcConnection::request`].
    pub async fn request_with_timeout<T: Serialize>(
        &self,
        method: Method,
        path: &str,
        data: T,
        request_timeout: Duration,
    ) -> Result<Bytes> {
        let ledger = &self.inner.ledger;

        let (reply_tx, reply_rx) = oneshot::channel();
        let callback_id = ledger.append(reply_tx);

        let text = match Request::new(method, path, callback_id, data).to_text() {
            Ok(text) => text,
            Err(e) => {
                ledger.remove(callback_id);
                return Err(e);
            }
        };

        if let Err(e) = self.inner.socket.send(text).await {
            ledger.remove(callback_id);
            return Err(e);
        }
        trace!(%callback_id, %method, path, "Request sent");

        match timeout(request_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Cancelled),
            Err(_) => {
                ledger.remove(callback_id);
                Err(Error::request_timeout(callback_id, config::millis(request_timeout)))
            }
        }
    }

    /// Sends a `GET` request without a body.
    ///
    /// # Errors
    ///
    /// See [`RpcConnection::request`].
    pub async fn get(&self, path: &str) -> Result<Bytes> {
        self.request(Method::Get, path, Value::Null).await
    }

    /// Sends a `POST` request.
    ///
    /// # Errors
    ///
    /// See [`RpcConnection::request`].
    pub async fn post<T: Serialize>(&self, path: &str, data: T) -> Result<Bytes> {
        self.request(Method::Post, path, data).await
    }

    /// Sends a request and decodes the `data` field of the reply.
    ///
    /// # Errors
    ///
    /// - See [`RpcConnection::request`]
    /// - [`Error::Json`] if `data` does not match `R`
    pub async fn request_data<R, T>(&self, method: Method, path: &str, data: T) -> Result<R>
    where
        R: DeserializeOwned,
        T: Serialize,
    {
        let payload = self.request(method, path, data).await?;
        decode_data(&payload)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    use crate::identifiers::CallbackId;
    use crate::socket::{AutoReconnect, ConnectionState};
    use crate::transport::mock::{MockFactory, MockShared, OnResume};
    use crate::transport::{CloseCode, TransportEvent, TransportFactory};

    async fn connected(factory: &Arc<MockFactory>) -> RpcConnection {
        connected_with(factory, AutoReconnect::disabled()).await
    }

    async fn connected_with(factory: &Arc<MockFactory>, reconnect: AutoReconnect) -> RpcConnection {
        let socket = WebSocket::builder()
            .transport_factory(Arc::clone(factory) as Arc<dyn TransportFactory>)
            .connect_timeout(Duration::from_secs(1))
            .auto_reconnect(reconnect)
            .build()
            .expect("build socket");
        let rpc = RpcConnection::new(socket);
        rpc.connect().await.expect("connect");
        rpc
    }

    /// Waits for the `index`-th outbound request and returns it.
    async fn nth_request(transport: &MockShared, index: usize) -> Value {
        for _ in 0..100 {
            if let Some(text) = transport.sent_text().get(index) {
                return serde_json::from_str(text).expect("request json");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("request {index} never sent");
    }

    fn reply(request: &Value, code: i64, extra: Value) -> String {
        let mut reply = json!({
            "code": code,
            "callback_id": request["callback_id"],
            "error": null,
        });
        if let (Some(reply), Some(extra)) = (reply.as_object_mut(), extra.as_object()) {
            reply.extend(extra.clone());
        }
        reply.to_string()
    }

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_REQUEST_TIMEOUT.as_secs(), 30);
    }

    #[tokio::test]
    async fn test_success_returns_raw_reply() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready));
        let rpc = connected(&factory).await;

        let pending = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.get("/status").await })
        };

        let transport = factory.latest();
        let request = nth_request(&transport, 0).await;
        assert_eq!(request["method"], "GET");
        assert_eq!(request["path"], "/status");

        let text = reply(&request, 200, json!({"data": {"ok": true}}));
        transport.push(text.clone());

        let payload = pending.await.expect("join").expect("reply");
        assert_eq!(payload, Bytes::from(text));
        assert_eq!(rpc.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_status_classes_reach_caller() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready));
        let rpc = connected(&factory).await;
        let transport = factory.latest();

        for (index, code) in [404i64, 503, 250, 999].into_iter().enumerate() {
            let pending = {
                let rpc = rpc.clone();
                tokio::spawn(async move { rpc.post("/items", json!({"n": index})).await })
            };

            let request = nth_request(&transport, index).await;
            transport.push(reply(&request, code, json!({"error": {"message": "nope"}})));
            let result = pending.await.expect("join");

            match code {
                404 => assert!(matches!(result, Err(Error::ClientError { code: 404, .. }))),
                503 => assert!(matches!(result, Err(Error::ServerError { code: 503, .. }))),
                250 => assert!(result.is_ok()),
                _ => assert!(matches!(result, Err(Error::UnexpectedStatus { code: 999 }))),
            }
        }
    }

    #[tokio::test]
    async fn test_replies_routed_out_of_order() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready));
        let rpc = connected(&factory).await;
        let transport = factory.latest();

        let first = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.request_data::<String, _>(Method::Get, "/a", Value::Null).await })
        };
        let first_request = nth_request(&transport, 0).await;

        let second = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.request_data::<String, _>(Method::Get, "/b", Value::Null).await })
        };
        let second_request = nth_request(&transport, 1).await;

        transport.push(reply(&second_request, 200, json!({"data": "b"})));
        transport.push(reply(&first_request, 200, json!({"data": "a"})));

        assert_eq!(first.await.expect("join").expect("reply"), "a");
        assert_eq!(second.await.expect("join").expect("reply"), "b");
    }

    #[tokio::test]
    async fn test_garbage_and_unknown_ids_are_skipped() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready));
        let rpc = connected(&factory).await;
        let transport = factory.latest();

        let pending = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.get("/status").await })
        };
        let request = nth_request(&transport, 0).await;

        let known = CallbackId::from_wire(request["callback_id"].as_i64().expect("id")).expect("id");
        let unknown = CallbackId::new(known.get().wrapping_add(1));

        transport.push("not json");
        transport.push(json!({"code": 200, "callback_id": unknown}).to_string());
        transport.push(reply(&request, 200, json!({})));

        assert!(pending.await.expect("join").is_ok());
        assert!(rpc.is_connected());
    }

    #[tokio::test]
    async fn test_request_timeout_removes_slot() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready));
        let rpc = connected(&factory).await;

        let result = rpc
            .request_with_timeout(Method::Get, "/slow", Value::Null, Duration::from_millis(20))
            .await;

        assert!(matches!(result, Err(Error::RequestTimeout { timeout_ms: 20, .. })));
        assert_eq!(rpc.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_send_failure_removes_slot() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready).failing_sends(1));
        let rpc = connected(&factory).await;

        let result = rpc.get("/status").await;

        assert!(matches!(result, Err(Error::Connection { .. })));
        assert_eq!(rpc.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready));
        let rpc = connected(&factory).await;
        let transport = factory.latest();

        let pending: Vec<_> = (0..3)
            .map(|i| {
                let rpc = rpc.clone();
                tokio::spawn(async move { rpc.get(&format!("/item/{i}")).await })
            })
            .collect();
        nth_request(&transport, 2).await;
        assert_eq!(rpc.pending_count(), 3);

        rpc.disconnect();

        for task in pending {
            let result = task.await.expect("join");
            assert!(matches!(result, Err(Error::Cancelled)));
        }
        assert_eq!(rpc.pending_count(), 0);
        assert!(matches!(rpc.get("/late").await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_peer_close_fails_pending() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready));
        let rpc = connected(&factory).await;
        let transport = factory.latest();

        let pending = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.get("/status").await })
        };
        nth_request(&transport, 0).await;

        transport.emit(TransportEvent::Closed {
            code: CloseCode::GoingAway,
            reason: None,
        });

        let result = pending.await.expect("join");
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_session_replaced_by_reconnect_fails_pending() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready));
        let rpc = connected_with(
            &factory,
            AutoReconnect::enabled(3, Duration::from_millis(10)),
        )
        .await;
        let transport = factory.latest();

        let pending = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.get("/status").await })
        };
        nth_request(&transport, 0).await;

        transport.emit(TransportEvent::Closed {
            code: CloseCode::GoingAway,
            reason: None,
        });

        let result = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("resolved before the request timeout")
            .expect("join");
        assert!(matches!(result, Err(Error::ConnectionClosed)));
        assert_eq!(rpc.pending_count(), 0);

        rpc.socket()
            .wait_for(ConnectionState::is_connected)
            .await
            .expect("reconnected");
        assert_eq!(factory.created(), 2);

        let next = {
            let rpc = rpc.clone();
            tokio::spawn(async move { rpc.get("/again").await })
        };
        let replacement = factory.nth(1);
        let request = nth_request(&replacement, 0).await;
        assert_eq!(request["path"], "/again");
        replacement.push(reply(&request, 200, json!({})));

        assert!(next.await.expect("join").is_ok());
    }
}
