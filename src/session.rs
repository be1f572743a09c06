//! # The session facade.
//!
//! [`Tson`] owns a [`Config`], the registry built from it, and an observer,
//! and exposes the two ends of the protocol: `stringify` (plus the SSE
//! reframing) on the producer side and `parse` on the consumer side.
//!
//! # High-level architecture
//!
//! ```text
//!   Value tree ──► fold ──► drive task ──► ChunkStream      (producer)
//!
//!   chunk source ──► FrameParser ──► Dispatcher ──► handles (consumer)
//!                         │                │
//!                      head event       tail rows
//! ```
//!
//! `parse` resolves with the reconstructed root as soon as the head has
//! been parsed; a spawned router keeps feeding tail rows to the handles
//! inside that root until the frame closes, the source ends, or the session
//! is cancelled.

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::decode::{Dispatcher, FrameEvent, FrameParser};
use crate::encode::{spawn_drive, sse_stream, ChunkStream, FoldCtx};
use crate::error::{DecodeError, EncodeError, Fault};
use crate::observer::{NoopObserver, StreamObserver};
use crate::types::Registry;
use crate::value::Value;

/// A serialization/deserialization session factory.
///
/// One `Tson` can serve any number of concurrent `stringify` and `parse`
/// calls; each call is an independent session with its own nonce and id
/// space. All of them share the registry, guards and cancellation token.
pub struct Tson<O: StreamObserver + 'static = NoopObserver> {
    pub cfg: Config,
    pub obs: Arc<O>,
    registry: Arc<Registry>,
}

impl Tson<NoopObserver> {
    /// A session factory with the default configuration and no observer.
    pub fn with_defaults() -> Self {
        Self::new(Config::default(), NoopObserver)
    }
}

impl<O: StreamObserver + 'static> Tson<O> {
    pub fn new(cfg: Config, observer: O) -> Self {
        let registry = Arc::new(Registry::build(cfg.types.clone(), cfg.include_builtins));
        Self {
            cfg,
            obs: Arc::new(observer),
            registry,
        }
    }

    /// Serializes a value tree into an async sequence of frame chunks.
    ///
    /// The root is folded eagerly: registry and guard failures abort here,
    /// before any bytes exist. Producers found in the tree are drained by a
    /// background task for as long as the returned stream is alive.
    pub fn stringify(&self, root: Value) -> Result<ChunkStream, EncodeError> {
        self.stringify_indent(root, None)
    }

    /// Like [`stringify`](Self::stringify), with `indent` spaces of pretty
    /// printing applied to the head and each row.
    pub fn stringify_indent(
        &self,
        root: Value,
        indent: Option<usize>,
    ) -> Result<ChunkStream, EncodeError> {
        let nonce = (self.cfg.nonce)();
        let mut ctx = FoldCtx::new(
            self.registry.clone(),
            self.cfg.guards.clone(),
            nonce,
            self.cfg.fold_depth_limit,
        );
        let (head, drains) = ctx.fold(root)?;
        tracing::debug!(producers = drains.len(), "head folded, draining");
        Ok(spawn_drive(
            ctx,
            head,
            drains,
            indent,
            self.cfg.chunk_capacity,
            self.cfg.cancel.clone(),
            self.obs.clone(),
        ))
    }

    /// Serializes a value tree reframed as Server-Sent Events, one `data:`
    /// record per line of the underlying frame.
    pub fn to_sse(&self, root: Value) -> Result<impl Stream<Item = String> + Send, EncodeError> {
        Ok(sse_stream(self.stringify(root)?))
    }

    /// Reconstructs a value tree from an async sequence of frame chunks.
    ///
    /// Resolves as soon as the head is parsed; promises and streams inside
    /// the returned root keep settling as tail rows arrive. If the source
    /// ends or breaks the protocol first, every pending handle observes a
    /// terminal fault and the observer is notified once.
    pub async fn parse<S>(&self, source: S) -> Result<Value, DecodeError>
    where
        S: Stream<Item = String> + Send + 'static,
    {
        let mut source = source.boxed();
        let mut parser = FrameParser::new();
        let mut events: Vec<FrameEvent> = Vec::new();
        let cancel = self.cfg.cancel.clone();

        let head = loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(DecodeError::Interrupted),
                chunk = source.next() => chunk,
            };
            let Some(chunk) = chunk else {
                return Err(DecodeError::Interrupted);
            };
            parser.push(&chunk, &mut events)?;
            if matches!(events.first(), Some(FrameEvent::Head(_))) {
                if let FrameEvent::Head(head) = events.remove(0) {
                    break head;
                }
            }
        };

        let (mut dispatcher, root) =
            Dispatcher::materialize(self.registry.clone(), self.cfg.guards.clone(), head)?;

        // Rows and even the frame end may have landed in the same chunk as
        // the head; absorb them before deciding whether a router is needed.
        let mut done = false;
        for event in events.drain(..) {
            match event {
                FrameEvent::Row(row) => {
                    if let Err(err) = dispatcher.route(row) {
                        dispatcher.interrupt(&fault_for(&err));
                        self.obs.on_interrupted(&err).await;
                        return Ok(root);
                    }
                }
                FrameEvent::End => done = true,
                FrameEvent::Head(_) => {}
            }
        }

        if done {
            finish(&mut dispatcher);
            return Ok(root);
        }

        tokio::spawn(route_tail(parser, dispatcher, source, cancel, self.obs.clone()));
        Ok(root)
    }
}

/// Drives the tail of one parse session after the head has been returned.
async fn route_tail<O: StreamObserver + 'static>(
    mut parser: FrameParser,
    mut dispatcher: Dispatcher,
    mut source: BoxStream<'static, String>,
    cancel: CancellationToken,
    obs: Arc<O>,
) {
    let mut events = Vec::new();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                dispatcher.interrupt(&Fault::Interrupted);
                return;
            }
            chunk = source.next() => chunk,
        };
        let Some(chunk) = chunk else {
            if !parser.is_done() {
                let err = DecodeError::Interrupted;
                tracing::warn!("source ended before the frame closed");
                dispatcher.interrupt(&Fault::Interrupted);
                obs.on_interrupted(&err).await;
            }
            return;
        };

        if let Err(err) = parser.push(&chunk, &mut events) {
            dispatcher.interrupt(&fault_for(&err));
            obs.on_interrupted(&err).await;
            return;
        }

        for event in events.drain(..) {
            match event {
                FrameEvent::Row(row) => {
                    if let Err(err) = dispatcher.route(row) {
                        dispatcher.interrupt(&fault_for(&err));
                        obs.on_interrupted(&err).await;
                        return;
                    }
                }
                FrameEvent::End => {
                    finish(&mut dispatcher);
                    return;
                }
                FrameEvent::Head(_) => {}
            }
        }
    }
}

/// Closes out a completed frame. A well-formed producer terminates every
/// handle before the frame closes; anything still pending here is treated
/// as interrupted.
fn finish(dispatcher: &mut Dispatcher) {
    if dispatcher.has_pending() {
        tracing::warn!("frame closed with unterminated producers");
        dispatcher.interrupt(&Fault::Interrupted);
    }
}

fn fault_for(err: &DecodeError) -> Fault {
    match err {
        DecodeError::Interrupted => Fault::Interrupted,
        other => Fault::Protocol(other.to_string()),
    }
}
