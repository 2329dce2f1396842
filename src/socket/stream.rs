//! Pull-based message stream.
//!
//! [`MessageStream`] turns repeated `receive` calls into a
//! [`Stream`](futures_util::Stream) of payloads. It ends cleanly when the
//! socket is closed on purpose and yields the error once, then ends, when
//! the connection breaks.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::{BoxStream, FusedStream};
use futures_util::{Stream, StreamExt, stream};
use tracing::debug;

use crate::error::{Error, Result};
use crate::transport::CloseCode;

use super::{ConnectionState, WebSocket};

// ============================================================================
// MessageStream
// ============================================================================

/// Stream of payloads received on a [`WebSocket`].
///
/// Created by [`WebSocket::stream`]. Each item is one `receive` call, so
/// messages arrive in wire order.
pub struct MessageStream {
    inner: BoxStream<'static, Result<Bytes>>,
    done: bool,
}

impl fmt::Debug for MessageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStream")
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl MessageStream {
    pub(crate) fn new(socket: WebSocket) -> Self {
        let inner = stream::unfold(Some(socket), |socket| async move {
            let socket = socket?;
            match socket.receive().await {
                Ok(payload) => Some((Ok(payload), Some(socket))),
                Err(e) if ends_cleanly(&socket, &e) => {
                    debug!(error = %e, "Message stream finished");
                    None
                }
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed();

        Self { inner, done: false }
    }
}

/// Returns `true` if `error` marks an orderly end rather than a failure.
fn ends_cleanly(socket: &WebSocket, error: &Error) -> bool {
    match error {
        Error::Cancelled | Error::NotConnected => true,
        Error::ConnectionClosed => matches!(
            socket.state(),
            ConnectionState::Disconnected {
                close_code: CloseCode::Normal,
                ..
            }
        ),
        _ => false,
    }
}

impl Stream for MessageStream {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        let item = std::task::ready!(self.inner.poll_next_unpin(cx));
        if item.is_none() {
            self.done = true;
        }
        Poll::Ready(item)
    }
}

impl FusedStream for MessageStream {
    fn is_terminated(&self) -> bool {
        self.done
    }
}

// ============================================================================
// Tests
// ============================================================================
