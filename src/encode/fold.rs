//! # Head encoder: depth-first fold of a value tree into plain JSON.
//!
//! Folding rewrites the tree bottom-up. Each node is checked against the
//! registry first; a sync match is replaced by `[key, payload, nonce]` with
//! the payload folded recursively, an async match is replaced by
//! `[key, id, nonce]` with the producer's event source collected for the
//! drain loop. Plain containers are walked structurally, scalars pass
//! through unchanged.
//!
//! Ids are assigned in first-encounter order, both during head encoding and
//! later while folding drained events, so one [`FoldCtx`] lives as long as
//! its session.

use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde_json::Value as Json;

use crate::config::Guard;
use crate::error::EncodeError;
use crate::handle::Settled;
use crate::types::{ProducerId, Registry, TagEntry};
use crate::value::Value;

/// Event source of one registered producer, awaiting drain.
pub(crate) enum EventSource {
    /// Single-shot: settles once.
    Once(BoxFuture<'static, Settled>),
    /// Multi-shot: yields values until a terminator.
    Many(BoxStream<'static, Settled>),
}

/// A producer discovered during a fold, not yet drained.
pub(crate) struct Drain {
    pub(crate) id: ProducerId,
    pub(crate) source: EventSource,
}

impl std::fmt::Debug for Drain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Drain").field("id", &self.id).finish()
    }
}

/// Session-scoped fold state: registry, guards, nonce and the id counter.
pub(crate) struct FoldCtx {
    registry: Arc<Registry>,
    guards: Vec<Guard>,
    nonce: Json,
    depth_limit: usize,
    next_id: ProducerId,
}

impl FoldCtx {
    pub(crate) fn new(
        registry: Arc<Registry>,
        guards: Vec<Guard>,
        nonce: Json,
        depth_limit: usize,
    ) -> Self {
        Self {
            registry,
            guards,
            nonce,
            depth_limit,
            next_id: 0,
        }
    }

    pub(crate) fn nonce(&self) -> &Json {
        &self.nonce
    }

    /// Folds one value, returning its JSON image and the producers found in
    /// its subtree in first-encounter order.
    pub(crate) fn fold(&mut self, value: Value) -> Result<(Json, Vec<Drain>), EncodeError> {
        let mut drains = Vec::new();
        let json = self.fold_at(value, 0, &mut drains)?;
        Ok((json, drains))
    }

    fn fold_at(
        &mut self,
        value: Value,
        depth: usize,
        drains: &mut Vec<Drain>,
    ) -> Result<Json, EncodeError> {
        if depth > self.depth_limit {
            return Err(EncodeError::DepthExceeded {
                limit: self.depth_limit,
            });
        }

        let matched = self.registry.match_fold(&value).cloned();
        match matched {
            Some(TagEntry::Sync(tag)) => {
                let payload = tag.serialize(value)?;
                self.check_guards(&payload, tag.key())?;
                let folded = self.fold_at(payload, depth + 1, drains)?;
                Ok(self.placeholder(tag.key(), folded))
            }
            Some(TagEntry::Async(tag)) => {
                let source = match value {
                    Value::Promise(p) => EventSource::Once(p.into_future()),
                    Value::Stream(s) => EventSource::Many(s.into_source()),
                    other => return Err(EncodeError::UnknownTag { kind: other.kind() }),
                };
                let id = self.next_id;
                self.next_id += 1;
                drains.push(Drain { id, source });
                Ok(self.placeholder(tag.key(), Json::from(id)))
            }
            None => match value {
                Value::Null => Ok(Json::Null),
                Value::Bool(b) => Ok(Json::Bool(b)),
                Value::Number(n) => Ok(Json::Number(n)),
                Value::String(s) => Ok(Json::String(s)),
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.fold_at(item, depth + 1, drains)?);
                    }
                    Ok(Json::Array(out))
                }
                Value::Object(members) => {
                    let mut out = serde_json::Map::with_capacity(members.len());
                    for (k, v) in members {
                        out.insert(k, self.fold_at(v, depth + 1, drains)?);
                    }
                    Ok(Json::Object(out))
                }
                other => Err(EncodeError::UnknownTag { kind: other.kind() }),
            },
        }
    }

    fn placeholder(&self, key: &str, middle: Json) -> Json {
        Json::Array(vec![Json::String(key.to_owned()), middle, self.nonce.clone()])
    }

    fn check_guards(&self, payload: &Value, key: &str) -> Result<(), EncodeError> {
        if self.guards.iter().all(|g| g(payload)) {
            Ok(())
        } else {
            Err(EncodeError::GuardRejected { key: key.into() })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::{Promise, ValueStream};
    use serde_json::json;

    fn ctx() -> FoldCtx {
        FoldCtx::new(
            Arc::new(Registry::build(Vec::new(), true)),
            Vec::new(),
            json!("__tson"),
            128,
        )
    }

    #[test]
    fn plain_values_pass_through() {
        let (json, drains) = ctx()
            .fold(Value::from(json!({"foo": "bar", "n": [1, null]})))
            .unwrap();
        assert_eq!(json, json!({"foo": "bar", "n": [1, null]}));
        assert!(drains.is_empty());
    }

    #[test]
    fn bigint_folds_to_a_tagged_string() {
        let (json, _) = ctx().fold(Value::BigInt(1 << 90)).unwrap();
        assert_eq!(json, json!(["bigint", (1i128 << 90).to_string(), "__tson"]));
    }

    #[test]
    fn producers_get_ids_in_encounter_order() {
        let root = Value::object([
            ("a", Value::Promise(Promise::resolved(Value::Null))),
            ("b", Value::Stream(ValueStream::from_values([]))),
        ]);
        let (json, drains) = ctx().fold(root).unwrap();
        assert_eq!(
            json,
            json!({"a": ["Promise", 0, "__tson"], "b": ["Stream", 1, "__tson"]})
        );
        assert_eq!(drains.len(), 2);
        assert_eq!(drains[0].id, 0);
        assert_eq!(drains[1].id, 1);
    }

    #[test]
    fn unregistered_rich_kind_is_rejected_before_io() {
        let mut bare = FoldCtx::new(
            Arc::new(Registry::build(Vec::new(), false)),
            Vec::new(),
            json!("__tson"),
            128,
        );
        let err = bare
            .fold(Value::Promise(Promise::resolved(Value::Null)))
            .unwrap_err();
        assert!(matches!(err, EncodeError::UnknownTag { kind: "promise" }));
    }

    #[test]
    fn depth_limit_fails_typed() {
        let mut v = Value::Null;
        for _ in 0..40 {
            v = Value::array([v]);
        }
        let mut shallow = FoldCtx::new(
            Arc::new(Registry::build(Vec::new(), true)),
            Vec::new(),
            json!("__tson"),
            8,
        );
        assert!(matches!(
            shallow.fold(v).unwrap_err(),
            EncodeError::DepthExceeded { limit: 8 }
        ));
    }

    #[test]
    fn guard_rejection_names_the_tag() {
        let mut guarded = FoldCtx::new(
            Arc::new(Registry::build(Vec::new(), true)),
            vec![Arc::new(|v: &Value| v.as_str() != Some("7"))],
            json!("__tson"),
            128,
        );
        let err = guarded.fold(Value::BigInt(7)).unwrap_err();
        assert!(matches!(err, EncodeError::GuardRejected { key } if key == "bigint"));
    }
}
