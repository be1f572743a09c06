//! # Dispatcher: materializes handles and routes tail rows to them.
//!
//! On the head event the dispatcher walks the folded tree, turning every
//! placeholder carrying the session nonce back into a value: sync payloads
//! through the registry's deserialize half, async placeholders into live
//! handles registered in an id table. Each subsequent row is routed to its
//! handle; row payloads are themselves walked first, so nested producers
//! become handles before user code can observe them.
//!
//! The table is mutated only here. A row for an unknown id is a protocol
//! violation that interrupts every pending handle; interruption fires at
//! most once because the table is drained by it.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value as Json;
use tokio::sync::mpsc;

use crate::config::Guard;
use crate::error::{DecodeError, Fault};
use crate::handle::{Promise, PromiseSlot, Settled, ValueStream};
use crate::types::{ProducerId, ProducerKind, Registry, TagEntry};
use crate::value::Value;

/// Feeding half of one materialized handle.
enum HandleSender {
    Once(PromiseSlot),
    Many(mpsc::UnboundedSender<Settled>),
}

impl std::fmt::Debug for HandleSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandleSender::Once(_) => f.write_str("HandleSender::Once"),
            HandleSender::Many(_) => f.write_str("HandleSender::Many"),
        }
    }
}

/// Consumer-side session state: nonce, registry and the id-indexed table.
pub(crate) struct Dispatcher {
    registry: Arc<Registry>,
    guards: Vec<Guard>,
    nonce: Json,
    handles: HashMap<ProducerId, HandleSender>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("guards", &self.guards.len())
            .field("nonce", &self.nonce)
            .field("handles", &self.handles.len())
            .finish()
    }
}

impl Dispatcher {
    /// Walks a head element into the reconstructed root, registering a
    /// handle for every async placeholder found.
    pub(crate) fn materialize(
        registry: Arc<Registry>,
        guards: Vec<Guard>,
        head: Json,
    ) -> Result<(Self, Value), DecodeError> {
        let Json::Object(mut head) = head else {
            return Err(DecodeError::protocol("head must be an object"));
        };
        let nonce = head
            .remove("nonce")
            .ok_or_else(|| DecodeError::protocol("head without a nonce"))?;
        if nonce.is_array() || nonce.is_object() {
            return Err(DecodeError::protocol("nonce must be a scalar"));
        }
        let json = head
            .remove("json")
            .ok_or_else(|| DecodeError::protocol("head without a json member"))?;

        let mut dispatcher = Self {
            registry,
            guards,
            nonce,
            handles: HashMap::new(),
        };
        let root = dispatcher.unfold(json)?;
        Ok((dispatcher, root))
    }

    /// True while any handle still awaits a terminator.
    pub(crate) fn has_pending(&self) -> bool {
        !self.handles.is_empty()
    }

    /// Routes one tail row to its handle.
    pub(crate) fn route(&mut self, row: Json) -> Result<(), DecodeError> {
        let Json::Array(parts) = row else {
            return Err(DecodeError::protocol("tail row must be an array"));
        };
        let mut parts = parts.into_iter();
        let id = parts
            .next()
            .and_then(|j| j.as_u64())
            .ok_or_else(|| DecodeError::protocol("tail row without a producer id"))?;
        let event = parts
            .next()
            .ok_or_else(|| DecodeError::protocol("tail row without an event"))?;
        if parts.next().is_some() {
            return Err(DecodeError::protocol("tail row with trailing elements"));
        }

        let Json::Array(event) = event else {
            return Err(DecodeError::protocol("row event must be an array"));
        };
        let mut event = event.into_iter();
        let code = event
            .next()
            .and_then(|j| j.as_u64())
            .ok_or_else(|| DecodeError::protocol("row event without a code"))?;
        let payload = event.next();

        let sender = self
            .handles
            .remove(&id)
            .ok_or_else(|| DecodeError::protocol(format!("row for unknown producer id {id}")))?;

        match (sender, code) {
            (HandleSender::Once(slot), 0) => match self.event_value(id, payload)? {
                Ok(value) => slot.fulfill(value),
                Err(fault) => slot.reject(fault),
            },
            (HandleSender::Once(slot), 1) => {
                let fault = match self.event_value(id, payload)? {
                    Ok(value) => to_fault(value),
                    Err(fault) => fault,
                };
                slot.reject(fault);
            }
            (HandleSender::Many(tx), 0) => {
                let settled = self.event_value(id, payload)?;
                let terminal = settled.is_err();
                let _ = tx.send(settled);
                if !terminal {
                    self.handles.insert(id, HandleSender::Many(tx));
                }
            }
            (HandleSender::Many(tx), 1) => {
                let fault = match self.event_value(id, payload)? {
                    Ok(value) => to_fault(value),
                    Err(fault) => fault,
                };
                let _ = tx.send(Err(fault));
            }
            (HandleSender::Many(_), 2) => {
                // Dropping the sender ends the stream normally.
            }
            (HandleSender::Once(slot), 2) => {
                self.handles.insert(id, HandleSender::Once(slot));
                return Err(DecodeError::protocol(format!(
                    "single-shot producer {id} cannot end without settling"
                )));
            }
            (sender, code) => {
                self.handles.insert(id, sender);
                return Err(DecodeError::protocol(format!(
                    "unknown event code {code} for producer {id}"
                )));
            }
        }
        Ok(())
    }

    /// Delivers `fault` to every pending handle and empties the table.
    pub(crate) fn interrupt(&mut self, fault: &Fault) {
        let drained = std::mem::take(&mut self.handles);
        tracing::debug!(pending = drained.len(), label = fault.as_label(), "interrupting handles");
        for (_, sender) in drained {
            match sender {
                HandleSender::Once(slot) => slot.reject(fault.clone()),
                HandleSender::Many(tx) => {
                    let _ = tx.send(Err(fault.clone()));
                }
            }
        }
    }

    /// Unfolds a row payload. A guard rejection converts into a fault for
    /// the receiving handle only; any other failure propagates and tears
    /// the session down.
    fn event_value(
        &mut self,
        id: ProducerId,
        payload: Option<Json>,
    ) -> Result<Settled, DecodeError> {
        let payload = payload
            .ok_or_else(|| DecodeError::protocol(format!("event for {id} without a payload")))?;
        match self.unfold(payload) {
            Ok(value) => Ok(Ok(value)),
            Err(DecodeError::GuardRejected { key }) => Ok(Err(Fault::named(
                "GuardRejected",
                format!("guard rejected value for tag '{key}'"),
            ))),
            Err(other) => Err(other),
        }
    }

    fn unfold(&mut self, json: Json) -> Result<Value, DecodeError> {
        match json {
            Json::Null => Ok(Value::Null),
            Json::Bool(b) => Ok(Value::Bool(b)),
            Json::Number(n) => Ok(Value::Number(n)),
            Json::String(s) => Ok(Value::String(s)),
            Json::Object(members) => {
                let mut out = crate::value::Map::new();
                for (k, v) in members {
                    out.insert(k, self.unfold(v)?);
                }
                Ok(Value::Object(out))
            }
            Json::Array(items) => match <[Json; 3]>::try_from(items) {
                Ok([Json::String(key), middle, nonce]) if nonce == self.nonce => {
                    self.unfold_placeholder(key, middle)
                }
                Ok(parts) => {
                    let mut out = Vec::with_capacity(3);
                    for p in parts {
                        out.push(self.unfold(p)?);
                    }
                    Ok(Value::Array(out))
                }
                Err(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.unfold(item)?);
                    }
                    Ok(Value::Array(out))
                }
            },
        }
    }

    fn unfold_placeholder(&mut self, key: String, middle: Json) -> Result<Value, DecodeError> {
        let entry = self
            .registry
            .by_key(&key)
            .cloned()
            .ok_or_else(|| DecodeError::protocol(format!("unknown tag key '{key}'")))?;
        match entry {
            TagEntry::Sync(tag) => {
                let payload = self.unfold(middle)?;
                let value = tag.deserialize(payload)?;
                if !self.guards.iter().all(|g| g(&value)) {
                    return Err(DecodeError::GuardRejected { key });
                }
                Ok(value)
            }
            TagEntry::Async(tag) => {
                let id = middle.as_u64().ok_or_else(|| {
                    DecodeError::protocol(format!("malformed placeholder for tag '{key}'"))
                })?;
                if self.handles.contains_key(&id) {
                    return Err(DecodeError::protocol(format!("duplicate producer id {id}")));
                }
                Ok(match tag.kind() {
                    ProducerKind::SingleShot => {
                        let (promise, slot) = Promise::pending();
                        self.handles.insert(id, HandleSender::Once(slot));
                        Value::Promise(promise)
                    }
                    ProducerKind::MultiShot => {
                        let (stream, tx) = ValueStream::channel();
                        self.handles.insert(id, HandleSender::Many(tx));
                        Value::Stream(stream)
                    }
                })
            }
        }
    }
}

/// Interprets a decoded rejection / error-end payload as a fault.
fn to_fault(value: Value) -> Fault {
    match value {
        Value::Error(f) => f,
        other => Fault::named(
            "Error",
            other
                .to_plain_json()
                .map(|j| j.to_string())
                .unwrap_or_else(|| other.kind().to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn registry() -> Arc<Registry> {
        Arc::new(Registry::build(Vec::new(), true))
    }

    fn materialize(head: Json) -> (Dispatcher, Value) {
        Dispatcher::materialize(registry(), Vec::new(), head).unwrap()
    }

    #[test]
    fn plain_head_has_no_handles() {
        let (disp, root) =
            materialize(json!({"json": {"foo": "bar"}, "nonce": "__tson"}));
        assert!(!disp.has_pending());
        assert_eq!(root.get("foo").and_then(Value::as_str), Some("bar"));
    }

    #[tokio::test]
    async fn promise_placeholder_becomes_a_pending_handle() {
        let (mut disp, mut root) =
            materialize(json!({"json": {"p": ["Promise", 0, "__tson"]}, "nonce": "__tson"}));
        assert!(disp.has_pending());

        disp.route(json!([0, [0, 42]])).unwrap();
        assert!(!disp.has_pending());

        let Some(Value::Promise(p)) = root.take("p") else {
            panic!("expected a promise handle");
        };
        assert_eq!(p.value().await.unwrap().as_i64(), Some(42));
    }

    #[tokio::test]
    async fn nonce_mismatch_reads_as_user_data() {
        let (disp, root) =
            materialize(json!({"json": ["Promise", 0, "other"], "nonce": "__tson"}));
        assert!(!disp.has_pending());
        assert_eq!(
            root,
            Value::array([Value::from("Promise"), Value::from(0i64), Value::from("other")])
        );
    }

    #[test]
    fn unknown_id_is_a_protocol_error() {
        let (mut disp, _root) =
            materialize(json!({"json": null, "nonce": "__tson"}));
        let err = disp.route(json!([3, [0, 1]])).unwrap_err();
        assert!(matches!(err, DecodeError::Protocol { .. }));
    }

    #[test]
    fn duplicate_producer_id_is_rejected() {
        let head = json!({
            "json": [["Promise", 0, "__tson"], ["Promise", 0, "__tson"]],
            "nonce": "__tson"
        });
        let err = Dispatcher::materialize(registry(), Vec::new(), head).unwrap_err();
        assert!(matches!(err, DecodeError::Protocol { .. }));
    }

    #[tokio::test]
    async fn stream_error_end_carries_the_fault() {
        let (mut disp, mut root) =
            materialize(json!({"json": ["Stream", 0, "__tson"], "nonce": "__tson"}));
        disp.route(json!([0, [0, "a"]])).unwrap();
        disp.route(json!([0, [1, ["Error", {"name": "Boom", "message": "bad"}, "__tson"]]]))
            .unwrap();

        let Value::Stream(vs) = &mut root else {
            panic!("expected a stream handle");
        };
        assert_eq!(vs.next().await.unwrap().unwrap().as_str(), Some("a"));
        assert_eq!(
            vs.next().await.unwrap().unwrap_err(),
            Fault::named("Boom", "bad")
        );
        assert!(vs.next().await.is_none());
    }

    #[tokio::test]
    async fn unknown_event_code_leaves_the_handle_reachable() {
        let (mut disp, mut root) =
            materialize(json!({"json": ["Stream", 0, "__tson"], "nonce": "__tson"}));
        let err = disp.route(json!([0, [5, "x"]])).unwrap_err();
        assert!(matches!(err, DecodeError::Protocol { .. }));

        assert!(disp.has_pending());
        disp.interrupt(&Fault::Protocol("unknown event code".into()));

        let Value::Stream(vs) = &mut root else {
            panic!("expected a stream handle");
        };
        assert!(matches!(vs.next().await, Some(Err(Fault::Protocol(_)))));
        assert!(vs.next().await.is_none());
    }

    #[tokio::test]
    async fn interrupt_faults_every_pending_handle_once() {
        let head = json!({
            "json": {"p": ["Promise", 0, "__tson"], "s": ["Stream", 1, "__tson"]},
            "nonce": "__tson"
        });
        let (mut disp, mut root) = materialize(head);
        disp.interrupt(&Fault::Interrupted);
        disp.interrupt(&Fault::Interrupted);

        let Some(Value::Promise(p)) = root.take("p") else {
            panic!("expected a promise handle");
        };
        assert_eq!(p.value().await.unwrap_err(), Fault::Interrupted);

        let Some(Value::Stream(mut vs)) = root.take("s") else {
            panic!("expected a stream handle");
        };
        assert_eq!(vs.next().await.unwrap().unwrap_err(), Fault::Interrupted);
        assert!(vs.next().await.is_none());
    }
}
