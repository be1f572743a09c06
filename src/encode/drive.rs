//! # Stream multiplexer: drains every live producer onto one chunk stream.
//!
//! `stringify` folds the root eagerly, then hands the head and the pending
//! drains to a spawned drive task. The task writes the opening of the frame,
//! then joins all producer event streams through a [`SelectAll`] and writes
//! one tail row per event in arrival order, so a slow producer never starves
//! a fast one. Per-producer order is the order its own source yields.
//!
//! ```text
//!   fold(root) ──► head ─────────────────────────► "[\n<head>\n,\n[\n"
//!                  drains ──► SelectAll ──► rows ► "[id,[0,v]]", ...
//!                                (arrival order)   "\n]\n]"
//! ```
//!
//! A producer whose event fails to fold is terminated with an in-band error
//! row and reported to the observer; its siblings keep draining. Closing the
//! consuming [`ChunkStream`] cancels the remaining producers and leaves the
//! frame syntactically unterminated, which the far side reports as an
//! interruption.

use std::collections::HashSet;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{self, BoxStream, SelectAll};
use futures::{Stream, StreamExt};
use serde_json::{json, Value as Json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::encode::fold::{Drain, EventSource, FoldCtx};
use crate::error::Fault;
use crate::observer::StreamObserver;
use crate::types::ProducerId;
use crate::value::Value;

/// One event observed while draining a producer.
enum DrainEvent {
    /// A value; terminal for single-shot producers.
    Value(Value),
    /// Error terminator.
    Fail(Fault),
    /// Normal end of a multi-shot producer.
    End,
}

/// # The outgoing side of a serialization session.
///
/// Yields UTF-8 fragments of the outer JSON frame. Dropping it signals
/// cancellation to every still-draining producer.
pub struct ChunkStream {
    rx: mpsc::Receiver<String>,
}

impl ChunkStream {
    /// Collects every remaining chunk into one string.
    pub async fn concat(mut self) -> String {
        let mut out = String::new();
        while let Some(chunk) = self.rx.recv().await {
            out.push_str(&chunk);
        }
        out
    }
}

impl Stream for ChunkStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

impl fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStream").finish()
    }
}

/// Spawns the drive task and returns its chunk stream.
pub(crate) fn spawn_drive<O>(
    ctx: FoldCtx,
    head: Json,
    drains: Vec<Drain>,
    indent: Option<usize>,
    capacity: usize,
    cancel: CancellationToken,
    obs: Arc<O>,
) -> ChunkStream
where
    O: StreamObserver + 'static,
{
    let (tx, rx) = mpsc::channel(capacity.max(1));
    tokio::spawn(drive(ctx, head, drains, indent, cancel, obs, tx));
    ChunkStream { rx }
}

async fn drive<O>(
    mut ctx: FoldCtx,
    head: Json,
    drains: Vec<Drain>,
    indent: Option<usize>,
    cancel: CancellationToken,
    obs: Arc<O>,
    tx: mpsc::Sender<String>,
) where
    O: StreamObserver + 'static,
{
    let head_doc = json!({"json": head, "nonce": ctx.nonce()});
    let opening = format!("[\n{}\n,\n[\n", render(&head_doc, indent));
    if tx.send(opening).await.is_err() {
        return;
    }

    let mut active: SelectAll<BoxStream<'static, (ProducerId, DrainEvent)>> = SelectAll::new();
    for drain in drains {
        active.push(drain_events(drain));
    }
    // Producers force-closed after a fold fault; late events from them are dropped.
    let mut closed: HashSet<ProducerId> = HashSet::new();
    let mut first = true;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("drain loop cancelled; frame left unterminated");
                return;
            }
            ev = active.next() => ev,
        };
        let Some((id, event)) = next else { break };
        if closed.contains(&id) {
            continue;
        }

        let row = match event {
            DrainEvent::Value(value) => match ctx.fold(value) {
                Ok((folded, nested)) => {
                    for drain in nested {
                        active.push(drain_events(drain));
                    }
                    json!([id, [0, folded]])
                }
                Err(e) => {
                    tracing::warn!(id, label = e.as_label(), %e, "event fold failed; terminating producer");
                    obs.on_producer_fault(id, &e).await;
                    closed.insert(id);
                    fault_row(&mut ctx, id, &Fault::from(e))
                }
            },
            DrainEvent::Fail(fault) => {
                closed.insert(id);
                fault_row(&mut ctx, id, &fault)
            }
            DrainEvent::End => json!([id, [2]]),
        };

        let sep = if first { "" } else { ",\n" };
        first = false;
        if tx.send(format!("{sep}{}", render(&row, indent))).await.is_err() {
            tracing::debug!("chunk sink closed; cancelling remaining producers");
            return;
        }
    }

    let closing = if first { "]\n]" } else { "\n]\n]" };
    let _ = tx.send(closing.into()).await;
}

/// Adapts one drain into a stream of `(id, event)` pairs that ends right
/// after its terminator.
fn drain_events(drain: Drain) -> BoxStream<'static, (ProducerId, DrainEvent)> {
    let Drain { id, source } = drain;
    match source {
        EventSource::Once(fut) => stream::once(async move {
            match fut.await {
                Ok(v) => (id, DrainEvent::Value(v)),
                Err(f) => (id, DrainEvent::Fail(f)),
            }
        })
        .boxed(),
        EventSource::Many(source) => stream::unfold(Some(source), move |state| async move {
            let mut source = state?;
            match source.next().await {
                Some(Ok(v)) => Some(((id, DrainEvent::Value(v)), Some(source))),
                Some(Err(f)) => Some(((id, DrainEvent::Fail(f)), None)),
                None => Some(((id, DrainEvent::End), None)),
            }
        })
        .boxed(),
    }
}

/// Builds an error-terminator row, falling back to a bare payload if the
/// fault value itself cannot be folded (e.g. a guard rejects it).
fn fault_row(ctx: &mut FoldCtx, id: ProducerId, fault: &Fault) -> Json {
    match ctx.fold(Value::Error(fault.clone())) {
        Ok((folded, _)) => json!([id, [1, folded]]),
        Err(_) => json!([id, [1, {"name": "Error", "message": fault.to_string()}]]),
    }
}

fn render(json: &Json, indent: Option<usize>) -> String {
    let Some(n) = indent.filter(|n| *n > 0) else {
        return json.to_string();
    };
    let pad = " ".repeat(n);
    let mut out = Vec::with_capacity(128);
    let fmt = serde_json::ser::PrettyFormatter::with_indent(pad.as_bytes());
    let mut ser = serde_json::Serializer::with_formatter(&mut out, fmt);
    if serde::Serialize::serialize(json, &mut ser).is_ok() {
        if let Ok(s) = String::from_utf8(out) {
            return s;
        }
    }
    json.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ValueStream;

    #[tokio::test]
    async fn multi_shot_drain_ends_with_end_event() {
        let vs = ValueStream::from_values([Value::from(1i64), Value::from(2i64)]);
        let mut events = drain_events(Drain {
            id: 7,
            source: EventSource::Many(vs.into_source()),
        });

        assert!(matches!(events.next().await, Some((7, DrainEvent::Value(_)))));
        assert!(matches!(events.next().await, Some((7, DrainEvent::Value(_)))));
        assert!(matches!(events.next().await, Some((7, DrainEvent::End))));
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn failed_drain_stops_at_the_terminator() {
        let vs = ValueStream::from_stream(stream::iter(vec![
            Ok(Value::from(1i64)),
            Err(Fault::msg("boom")),
            Ok(Value::from(3i64)),
        ]));
        let mut events = drain_events(Drain {
            id: 0,
            source: EventSource::Many(vs.into_source()),
        });

        assert!(matches!(events.next().await, Some((0, DrainEvent::Value(_)))));
        assert!(matches!(events.next().await, Some((0, DrainEvent::Fail(_)))));
        assert!(events.next().await.is_none());
    }

    #[test]
    fn render_honors_indent() {
        let v = json!({"a": [1, 2]});
        assert_eq!(render(&v, None), r#"{"a":[1,2]}"#);
        let pretty = render(&v, Some(4));
        assert!(pretty.contains("\n    \"a\""));
    }
}
