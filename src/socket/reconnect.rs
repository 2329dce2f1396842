//! Automatic reconnection.
//!
//! [`ReconnectPolicy`] decorates `send`/`receive` of a [`WebSocket`]. When an
//! operation fails with a transport-level error it waits, re-establishes
//! the connection with a fresh transport and retries, up to
//! [`AutoReconnect::max_retries`] times.
//!
//! Reconnects are serialized per socket. A task that failed on a session
//! which another task has already replaced simply retries on the new one.
//! An explicit `disconnect` stops any reconnect still waiting or connecting.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

use super::WebSocket;

// ============================================================================
// Constants
// ============================================================================

/// Default number of reconnect attempts per failed operation.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default pause before each reconnect attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// AutoReconnect
// ============================================================================

/// Reconnect configuration, fixed for the lifetime of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoReconnect {
    /// Whether failed operations are retried at all.
    pub enabled: bool,
    /// Reconnect attempts per failed operation.
    pub max_retries: u32,
    /// Pause before each attempt.
    pub delay: Duration,
}

impl Default for AutoReconnect {
    fn default() -> Self {
        Self::disabled()
    }
}

impl AutoReconnect {
    /// Reconnection turned off; failures reach the caller unchanged.
    #[inline]
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Reconnection turned on.
    #[inline]
    #[must_use]
    pub const fn enabled(max_retries: u32, delay: Duration) -> Self {
        Self {
            enabled: true,
            max_retries,
            delay,
        }
    }
}

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Retry decorator owned by one socket.
#[derive(Debug)]
pub(crate) struct ReconnectPolicy {
    config: AutoReconnect,
    /// Serializes reconnect attempts.
    gate: AsyncMutex<()>,
}

impl ReconnectPolicy {
    /// Creates a policy from its configuration.
    pub(crate) fn new(config: AutoReconnect) -> Self {
        Self {
            config,
            gate: AsyncMutex::new(()),
        }
    }

    /// Returns the configuration.
    #[inline]
    pub(crate) fn config(&self) -> AutoReconnect {
        self.config
    }

    /// Runs `operation`, reconnecting and retrying on transport failures.
    ///
    /// Returns the last observed error once retries are exhausted.
    pub(crate) async fn run<T, F, Fut>(
        &self,
        socket: &WebSocket,
        name: &'static str,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if !self.config.enabled {
            return operation().await;
        }

        let mut observed = socket.connected_generation();
        let mut last_error = match operation().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        for attempt in 1..=self.config.max_retries {
            if !last_error.is_retryable() || !socket.may_reconnect() {
                break;
            }

            warn!(
                operation = name,
                attempt,
                max_retries = self.config.max_retries,
                error = %last_error,
                "Operation failed, reconnecting"
            );

            if let Err(e) = self.reconnect(socket, observed).await {
                warn!(operation = name, attempt, error = %e, "Reconnect failed");
                last_error = e;
                continue;
            }

            observed = socket.connected_generation();
            match operation().await {
                Ok(value) => {
                    info!(operation = name, attempt, "Operation succeeded after reconnect");
                    return Ok(value);
                }
                Err(e) => last_error = e,
            }
        }

        Err(last_error)
    }

    /// Re-establishes the connection unless another task already did.
    ///
    /// `observed` is the connected session the failed operation ran against.
    async fn reconnect(&self, socket: &WebSocket, observed: Option<u64>) -> Result<()> {
        let _gate = self.gate.lock().await;

        if let Some(current) = socket.connected_generation()
            && Some(current) != observed
        {
            debug!(generation = current, "Session already replaced, retrying");
            return Ok(());
        }

        let mut disconnects = socket.disconnect_signal();
        if !socket.may_reconnect() {
            return Err(Error::Cancelled);
        }

        tokio::select! {
            () = sleep(self.config.delay) => {}
            _ = disconnects.changed() => {
                debug!("Disconnected while waiting to reconnect");
                return Err(Error::Cancelled);
            }
        }

        if !socket.may_reconnect() {
            return Err(Error::Cancelled);
        }
        socket.restart().await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::socket::ConnectionState;
    use crate::transport::CloseCode;
    use crate::transport::mock::{MockFactory, OnResume};

    const FAST: Duration = Duration::from_millis(5);

    fn socket(factory: Arc<MockFactory>, reconnect: AutoReconnect) -> WebSocket {
        WebSocket::builder()
            .transport_factory(factory)
            .connect_timeout(Duration::from_secs(1))
            .auto_reconnect(reconnect)
            .build()
            .expect("build socket")
    }

    #[test]
    fn test_default_is_disabled() {
        let config = AutoReconnect::default();
        assert!(!config.enabled);
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.delay, DEFAULT_RETRY_DELAY);
    }

    #[tokio::test]
    async fn test_disabled_passes_failure_through() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready).failing_sends(1));
        let socket = socket(Arc::clone(&factory), AutoReconnect::disabled());

        socket.connect().await.expect("connect");
        let result = socket.send("hello").await;

        assert!(matches!(result, Err(Error::Connection { .. })));
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_send_retried_on_fresh_transport() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready).failing_sends(1));
        let socket = socket(Arc::clone(&factory), AutoReconnect::enabled(2, FAST));

        socket.connect().await.expect("connect");
        socket.send("hello").await.expect("send after reconnect");

        assert_eq!(factory.created(), 2);
        assert!(factory.nth(0).sent_text().is_empty());
        assert_eq!(factory.nth(1).sent_text(), vec!["hello".to_string()]);
        assert!(socket.is_connected());
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_last_error() {
        let factory = Arc::new(
            MockFactory::new(OnResume::Ready)
                .failing_sends(1)
                .script([OnResume::Ready, OnResume::Fail("refused".into())]),
        );
        let socket = socket(Arc::clone(&factory), AutoReconnect::enabled(1, FAST));

        socket.connect().await.expect("connect");
        let result = socket.send("hello").await;

        match result {
            Err(Error::Connection { message }) => assert_eq!(message, "refused"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(factory.created(), 2);
    }

    #[tokio::test]
    async fn test_explicit_disconnect_is_not_retried() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready));
        let socket = socket(Arc::clone(&factory), AutoReconnect::enabled(3, FAST));

        socket.connect().await.expect("connect");
        socket.disconnect();

        let result = socket.send("hello").await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_during_retry_delay_is_final() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready).failing_sends(1));
        let socket = socket(
            Arc::clone(&factory),
            AutoReconnect::enabled(3, Duration::from_millis(200)),
        );
        socket.connect().await.expect("connect");

        let pending = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.send("hello").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        socket.disconnect();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("send resumed")
            .expect("join");
        assert!(matches!(result, Err(Error::Cancelled)));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(socket.close_code(), CloseCode::Normal);
        assert!(!socket.is_connected());
        assert_eq!(factory.created(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_while_reconnecting_is_final() {
        let factory = Arc::new(
            MockFactory::new(OnResume::Ready)
                .failing_sends(1)
                .script([OnResume::Ready, OnResume::Hold]),
        );
        let socket = socket(Arc::clone(&factory), AutoReconnect::enabled(3, FAST));
        socket.connect().await.expect("connect");

        let pending = {
            let socket = socket.clone();
            tokio::spawn(async move { socket.send("hello").await })
        };
        socket
            .wait_for(ConnectionState::is_connecting)
            .await
            .expect("reconnect started");
        socket.disconnect();

        let result = pending.await.expect("join");
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(!socket.is_connected());
        assert_eq!(factory.created(), 2);
        assert!(factory.nth(1).sent_text().is_empty());
    }

    #[tokio::test]
    async fn test_never_connected_is_not_retried() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready));
        let socket = socket(Arc::clone(&factory), AutoReconnect::enabled(3, FAST));

        let result = socket.receive().await;
        assert!(matches!(result, Err(Error::NotConnected)));
        assert_eq!(factory.created(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_one_reconnect() {
        let factory = Arc::new(MockFactory::new(OnResume::Ready).failing_sends(1));
        let socket = socket(Arc::clone(&factory), AutoReconnect::enabled(3, FAST));
        socket.connect().await.expect("connect");

        let attempts = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..4 {
            let socket = socket.clone();
            let attempts = Arc::clone(&attempts);
            handles.push(tokio::spawn(async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                socket.send(format!("message {i}")).await
            }));
        }

        for handle in handles {
            handle.await.expect("join").expect("send");
        }

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(factory.created(), 2);
        assert_eq!(factory.nth(1).sent_text().len(), 4);
    }
}
