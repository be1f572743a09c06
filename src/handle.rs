//! # Live handles: single-shot promises and multi-shot value streams.
//!
//! [`Promise`] and [`ValueStream`] are the two producer kinds the wire
//! protocol knows about, and both are dual-faced:
//!
//! - **Source face** (producer side): wraps a boxed future / stream supplied
//!   by user code. The multiplexer drains it and writes its events as tail
//!   rows.
//! - **Linked face** (consumer side): wraps the receiving half of a channel
//!   the dispatcher feeds as tail rows arrive.
//!
//! Both faces expose the same awaiting surface, so a tree that came out of
//! `parse` can be handed straight back to `stringify` and the session will
//! proxy events through.
//!
//! ```text
//!   producer value ──► Promise::from_future ──► multiplexer ──► wire
//!   wire ──► dispatcher ──► Promise (linked) ──► Promise::value().await
//! ```
//!
//! ## Terminal semantics
//!
//! A promise settles exactly once: fulfilled with a [`Value`] or rejected
//! with a [`Fault`]. A value stream yields any number of `Ok` values and
//! ends either normally (`None`) or with a single terminal `Err` followed by
//! `None`. Source-face items after a terminal `Err` are never drained.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};

use crate::error::Fault;
use crate::value::Value;

/// Outcome of a settled single-shot producer.
pub type Settled = Result<Value, Fault>;

enum PromiseInner {
    /// Producer face: a future supplied by user code.
    Source(BoxFuture<'static, Settled>),
    /// Consumer face: fed by the dispatcher when the tail row arrives.
    Linked(oneshot::Receiver<Settled>),
}

/// # Single-shot producer / handle.
///
/// States: pending, then exactly one of fulfilled or rejected.
/// [`Promise::value`] suspends the caller until the promise settles.
///
/// If the session underneath a linked promise is torn down without
/// delivering a row, awaiting it yields [`Fault::Interrupted`].
pub struct Promise {
    inner: PromiseInner,
}

impl Promise {
    /// Wraps a future as a single-shot producer.
    pub fn from_future<F>(fut: F) -> Self
    where
        F: std::future::Future<Output = Settled> + Send + 'static,
    {
        Self {
            inner: PromiseInner::Source(fut.boxed()),
        }
    }

    /// An already-fulfilled promise.
    pub fn resolved(value: Value) -> Self {
        Self::from_future(std::future::ready(Ok(value)))
    }

    /// An already-rejected promise.
    pub fn rejected(fault: Fault) -> Self {
        Self::from_future(std::future::ready(Err(fault)))
    }

    /// A pending promise plus the slot that settles it.
    pub fn pending() -> (Self, PromiseSlot) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                inner: PromiseInner::Linked(rx),
            },
            PromiseSlot { tx },
        )
    }

    /// Suspends until the promise settles.
    pub async fn value(self) -> Settled {
        match self.inner {
            PromiseInner::Source(fut) => fut.await,
            PromiseInner::Linked(rx) => rx.await.unwrap_or(Err(Fault::Interrupted)),
        }
    }

    /// Producer view for the multiplexer, identical for both faces.
    pub(crate) fn into_future(self) -> BoxFuture<'static, Settled> {
        match self.inner {
            PromiseInner::Source(fut) => fut,
            PromiseInner::Linked(rx) => {
                async move { rx.await.unwrap_or(Err(Fault::Interrupted)) }.boxed()
            }
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let face = match self.inner {
            PromiseInner::Source(_) => "source",
            PromiseInner::Linked(_) => "linked",
        };
        f.debug_struct("Promise").field("face", &face).finish()
    }
}

/// Settles a [`Promise`] created via [`Promise::pending`].
pub struct PromiseSlot {
    tx: oneshot::Sender<Settled>,
}

impl PromiseSlot {
    /// Fulfills the promise. A no-op if nobody is awaiting anymore.
    pub fn fulfill(self, value: Value) {
        let _ = self.tx.send(Ok(value));
    }

    /// Rejects the promise.
    pub fn reject(self, fault: Fault) {
        let _ = self.tx.send(Err(fault));
    }
}

impl fmt::Debug for PromiseSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromiseSlot").finish()
    }
}

enum StreamInner {
    Source(BoxStream<'static, Settled>),
    Linked(mpsc::UnboundedReceiver<Settled>),
}

/// # Multi-shot producer / handle.
///
/// Implements [`futures::Stream`] with item `Result<Value, Fault>`; consume
/// it with `StreamExt::next`. The queue between dispatcher and consumer is
/// unbounded: end-to-end backpressure is not part of the wire contract.
pub struct ValueStream {
    inner: StreamInner,
}

impl ValueStream {
    /// Wraps a stream as a multi-shot producer.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Settled> + Send + 'static,
    {
        Self {
            inner: StreamInner::Source(stream.boxed()),
        }
    }

    /// A producer that yields the given values and ends normally.
    pub fn from_values<I>(values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        Self::from_stream(futures::stream::iter(values.into_iter().map(Ok)))
    }

    /// Consumer face plus the sender the dispatcher feeds.
    pub(crate) fn channel() -> (Self, mpsc::UnboundedSender<Settled>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                inner: StreamInner::Linked(rx),
            },
            tx,
        )
    }

    /// Producer view for the multiplexer, identical for both faces.
    pub(crate) fn into_source(self) -> BoxStream<'static, Settled> {
        self.boxed()
    }
}

impl Stream for ValueStream {
    type Item = Settled;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match &mut self.get_mut().inner {
            StreamInner::Source(s) => s.as_mut().poll_next(cx),
            StreamInner::Linked(rx) => rx.poll_recv(cx),
        }
    }
}

impl fmt::Debug for ValueStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let face = match self.inner {
            StreamInner::Source(_) => "source",
            StreamInner::Linked(_) => "linked",
        };
        f.debug_struct("ValueStream").field("face", &face).finish()
    }
}
