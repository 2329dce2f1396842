//! In-memory transport double for unit tests.
//!
//! A [`MockFactory`] hands out [`MockTransport`]s and keeps a handle
//! ([`MockShared`]) to each, so tests can inspect what the socket did and
//! inject inbound messages or lifecycle events.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};

use crate::error::{Error, Result};

use super::{CloseCode, Message, Transport, TransportEvent, TransportEvents, TransportFactory};

/// What a transport does when resumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum OnResume {
    /// Report `Ready` immediately.
    Ready,
    /// Report `Failed` immediately.
    Fail(String),
    /// Report nothing; the test drives events through [`MockShared::emit`].
    Hold,
}

/// Observable state of one mock transport.
pub(crate) struct MockShared {
    pub resumes: AtomicUsize,
    pub sent: Mutex<Vec<Message>>,
    pub cancels: Mutex<Vec<(CloseCode, Option<Bytes>)>>,
    events: Mutex<Option<TransportEvents>>,
    inbound: mpsc::UnboundedSender<Result<Message>>,
    close_code: Mutex<CloseCode>,
    fail_sends: bool,
    echo: bool,
}

impl MockShared {
    /// Queues an inbound message.
    pub fn push(&self, message: impl Into<Message>) {
        let _ = self.inbound.send(Ok(message.into()));
    }

    /// Queues an inbound failure.
    pub fn push_error(&self, error: Error) {
        let _ = self.inbound.send(Err(error));
    }

    /// Emits a lifecycle event as if it came from the network.
    pub fn emit(&self, event: TransportEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            let _ = events.send(event);
        }
    }

    /// Returns the text of every sent message.
    pub fn sent_text(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
            .collect()
    }
}

/// Transport half handed to the socket.
pub(crate) struct MockTransport {
    shared: Arc<MockShared>,
    on_resume: OnResume,
    inbound: AsyncMutex<mpsc::UnboundedReceiver<Result<Message>>>,
}

#[async_trait]
impl Transport for MockTransport {
    fn resume(&self, events: TransportEvents) {
        self.shared.resumes.fetch_add(1, Ordering::SeqCst);
        *self.shared.events.lock() = Some(events.clone());

        match &self.on_resume {
            OnResume::Ready => {
                let _ = events.send(TransportEvent::Ready { protocol: None });
            }
            OnResume::Fail(message) => {
                *self.shared.close_code.lock() = CloseCode::Abnormal;
                let _ = events.send(TransportEvent::Failed {
                    message: message.clone(),
                });
            }
            OnResume::Hold => {}
        }
    }

    async fn receive(&self) -> Result<Message> {
        let mut inbound = self.inbound.lock().await;
        inbound.recv().await.unwrap_or(Err(Error::ConnectionClosed))
    }

    async fn send(&self, message: Message) -> Result<()> {
        if self.shared.fail_sends {
            return Err(Error::connection("broken pipe"));
        }
        if self.shared.echo {
            let _ = self.shared.inbound.send(Ok(message.clone()));
        }
        self.shared.sent.lock().push(message);
        Ok(())
    }

    fn cancel(&self, code: CloseCode, reason: Option<Bytes>) {
        *self.shared.close_code.lock() = code;
        self.shared.cancels.lock().push((code, reason));
        self.shared.emit(TransportEvent::Cancelled);
    }

    fn close_code(&self) -> CloseCode {
        *self.shared.close_code.lock()
    }
}

/// Factory recording every transport it creates.
pub(crate) struct MockFactory {
    scripts: Mutex<VecDeque<OnResume>>,
    default: OnResume,
    failing_senders: AtomicUsize,
    echo: bool,
    created: Mutex<Vec<Arc<MockShared>>>,
}

impl MockFactory {
    /// Every transport behaves as `default` on resume.
    pub fn new(default: OnResume) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            default,
            failing_senders: AtomicUsize::new(0),
            echo: false,
            created: Mutex::new(Vec::new()),
        }
    }

    /// Transports echo every sent message back as inbound.
    pub fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// The first transports behave as `scripts`, in order.
    pub fn script(self, scripts: impl IntoIterator<Item = OnResume>) -> Self {
        self.scripts.lock().extend(scripts);
        self
    }

    /// The first `count` transports fail every send.
    pub fn failing_sends(self, count: usize) -> Self {
        self.failing_senders.store(count, Ordering::SeqCst);
        self
    }

    /// Number of transports created so far.
    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    /// Handle to the most recent transport.
    pub fn latest(&self) -> Arc<MockShared> {
        Arc::clone(self.created.lock().last().expect("no transport created"))
    }

    /// Handle to the transport at `index`.
    pub fn nth(&self, index: usize) -> Arc<MockShared> {
        Arc::clone(&self.created.lock()[index])
    }
}

impl TransportFactory for MockFactory {
    fn make_transport(&self) -> Result<Arc<dyn Transport>> {
        let on_resume = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());

        let fail_sends = self
            .failing_senders
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let shared = Arc::new(MockShared {
            resumes: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
            cancels: Mutex::new(Vec::new()),
            events: Mutex::new(None),
            inbound: inbound_tx,
            close_code: Mutex::new(CloseCode::Invalid),
            fail_sends,
            echo: self.echo,
        });

        self.created.lock().push(Arc::clone(&shared));

        Ok(Arc::new(MockTransport {
            shared,
            on_resume,
            inbound: AsyncMutex::new(inbound),
        }))
    }
}
