//! Abstract message bus.
//!
//! Physical transport, addressing and wire encoding live outside this core.
//! The bus contract is small: deliver a typed message to a URI-addressed
//! endpoint, and tag every inbound delivery with the response address the
//! recipient can reply to without a separate discovery step.

use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Address of a bus endpoint.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Uri(String);

impl Uri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Uri {
    fn from(uri: &str) -> Self {
        Self(uri.to_owned())
    }
}

impl fmt::Debug for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uri({})", self.0)
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An inbound delivery: the event plus the response address the transport
/// tagged it with.
#[derive(Debug, Clone)]
pub struct Inbound<E> {
    pub message: E,
    pub response_address: Uri,
}

impl<E> Inbound<E> {
    pub fn new(message: E, response_address: impl Into<Uri>) -> Self {
        Self {
            message,
            response_address: response_address.into(),
        }
    }
}

/// A deferred send recorded by a transition handler.
///
/// Handlers never touch the bus directly; the router executes intents only
/// after the state mutation has committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendIntent<M> {
    /// Deliver to one endpoint (replies to a response address).
    Direct { to: Uri, message: M },
    /// Fan out to every subscriber of the message type.
    Publish { message: M },
}

/// Outbound half of the transport.
///
/// Sends are fire-and-forget relative to saga state: a failed send must
/// never corrupt already-committed state. Retry and backoff belong to the
/// transport, not to the roles using it.
pub trait MessageBus<M>: Send + Sync {
    fn send(&self, to: &Uri, message: M);

    fn publish(&self, message: M);
}

impl<M, B: MessageBus<M>> MessageBus<M> for Arc<B> {
    fn send(&self, to: &Uri, message: M) {
        (**self).send(to, message);
    }

    fn publish(&self, message: M) {
        (**self).publish(message);
    }
}

/// In-process loopback transport.
///
/// Direct sends are recorded per destination; publishes fan out over a
/// broadcast channel that [`subscribe`](Self::subscribe) exposes as a
/// stream. Cloning yields another handle onto the same bus.
pub struct MemoryBus<M> {
    sent: Arc<Mutex<Vec<(Uri, M)>>>,
    published: Arc<Mutex<Vec<M>>>,
    publish_tx: broadcast::Sender<M>,
}

impl<M> Clone for MemoryBus<M> {
    fn clone(&self) -> Self {
        Self {
            sent: Arc::clone(&self.sent),
            published: Arc::clone(&self.published),
            publish_tx: self.publish_tx.clone(),
        }
    }
}

impl<M: Clone + Send + 'static> Default for MemoryBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Clone + Send + 'static> MemoryBus<M> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (publish_tx, _) = broadcast::channel(capacity);
        Self {
            sent: Arc::new(Mutex::new(Vec::new())),
            published: Arc::new(Mutex::new(Vec::new())),
            publish_tx,
        }
    }

    /// Drain everything sent directly so far.
    pub fn take_sent(&self) -> Vec<(Uri, M)> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    /// Messages sent directly to one endpoint, oldest first.
    pub fn sent_to(&self, to: &Uri) -> Vec<M> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(uri, _)| uri == to)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Every message published so far, oldest first.
    pub fn published(&self) -> Vec<M> {
        self.published.lock().unwrap().clone()
    }

    /// Drain the publish log.
    pub fn take_published(&self) -> Vec<M> {
        std::mem::take(&mut *self.published.lock().unwrap())
    }

    /// Live stream of publishes from this point on.
    #[must_use]
    pub fn subscribe(&self) -> PublishStream<M> {
        PublishStream {
            inner: tokio_stream::wrappers::BroadcastStream::new(self.publish_tx.subscribe()),
        }
    }
}

impl<M: Clone + Send + fmt::Debug + 'static> MessageBus<M> for MemoryBus<M> {
    fn send(&self, to: &Uri, message: M) {
        trace!(%to, ?message, "loopback send");
        self.sent.lock().unwrap().push((to.clone(), message));
    }

    fn publish(&self, message: M) {
        trace!(?message, "loopback publish");
        self.published.lock().unwrap().push(message.clone());
        // No live subscribers is fine; the log above still records it.
        let _ = self.publish_tx.send(message);
    }
}

/// A receiver for published messages, wrapping a broadcast receiver.
pub struct PublishStream<M> {
    inner: tokio_stream::wrappers::BroadcastStream<M>,
}

impl<M: Clone + Send + 'static> Stream for PublishStream<M> {
    type Item = M;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match ready!(Pin::new(&mut self.get_mut().inner).poll_next(cx)) {
            Some(Ok(item)) => Poll::Ready(Some(item)),
            _ => Poll::Ready(None),
        }
    }
}
