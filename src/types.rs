//! # Tag registry: how values beyond plain JSON get on and off the wire.
//!
//! A [`TagEntry`] pairs a `test` predicate with a wire `key`. Sync entries
//! carry the serialize/deserialize pair applied in place; async entries only
//! classify a producer as single-shot or multi-shot; their events are
//! drained by the multiplexer, not folded in place.
//!
//! Matching follows registration order, first test wins. Key lookup on the
//! decode side is strict: a placeholder with an unknown key is a protocol
//! violation, not data.
//!
//! The built-in entries cover [`Value::BigInt`], [`Value::Error`],
//! [`Value::Promise`] and [`Value::Stream`]. User entries are consulted
//! before them, so both a key and a predicate can be shadowed.

use std::fmt;
use std::sync::Arc;

use crate::error::{DecodeError, EncodeError, Fault};
use crate::value::Value;

/// Monotonically assigned producer id, unique within a session.
pub type ProducerId = u64;

/// Predicate deciding whether an entry applies to a candidate value.
pub type TestFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
/// Sync fold half: value to wire-visible payload.
pub type SerializeFn = Arc<dyn Fn(Value) -> Result<Value, EncodeError> + Send + Sync>;
/// Sync unfold half: wire-visible payload back to value.
pub type DeserializeFn = Arc<dyn Fn(Value) -> Result<Value, DecodeError> + Send + Sync>;

/// The two producer kinds the wire protocol distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerKind {
    /// Settles exactly once: fulfillment or rejection.
    SingleShot,
    /// Yields any number of values, then ends normally or with an error.
    MultiShot,
}

/// Pure value ↔ payload transformation applied in place.
#[derive(Clone)]
pub struct SyncTag {
    key: String,
    test: TestFn,
    serialize: SerializeFn,
    deserialize: DeserializeFn,
}

impl SyncTag {
    /// Registers a sync transformation under `key`.
    ///
    /// `serialize` receives a value for which `test` returned true and folds
    /// it to a payload; the payload is folded recursively afterwards, so it
    /// may itself contain tagged or async values.
    pub fn new<T, S, D>(key: impl Into<String>, test: T, serialize: S, deserialize: D) -> Self
    where
        T: Fn(&Value) -> bool + Send + Sync + 'static,
        S: Fn(Value) -> Result<Value, EncodeError> + Send + Sync + 'static,
        D: Fn(Value) -> Result<Value, DecodeError> + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            test: Arc::new(test),
            serialize: Arc::new(serialize),
            deserialize: Arc::new(deserialize),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn serialize(&self, value: Value) -> Result<Value, EncodeError> {
        (self.serialize)(value)
    }

    pub(crate) fn deserialize(&self, payload: Value) -> Result<Value, DecodeError> {
        (self.deserialize)(payload)
    }
}

/// Classification of a live producer value.
#[derive(Clone)]
pub struct AsyncTag {
    key: String,
    kind: ProducerKind,
    test: TestFn,
}

impl AsyncTag {
    pub fn new<T>(key: impl Into<String>, kind: ProducerKind, test: T) -> Self
    where
        T: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self {
            key: key.into(),
            kind,
            test: Arc::new(test),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn kind(&self) -> ProducerKind {
        self.kind
    }
}

/// A registry entry: sync and async entries share `test` and `key`; the
/// fold/unfold half differs, so this is a two-case variant rather than a
/// trait hierarchy.
#[derive(Clone)]
pub enum TagEntry {
    Sync(SyncTag),
    Async(AsyncTag),
}

impl TagEntry {
    pub fn key(&self) -> &str {
        match self {
            TagEntry::Sync(t) => t.key(),
            TagEntry::Async(t) => t.key(),
        }
    }

    pub(crate) fn test(&self, value: &Value) -> bool {
        match self {
            TagEntry::Sync(t) => (t.test)(value),
            TagEntry::Async(t) => (t.test)(value),
        }
    }
}

impl fmt::Debug for TagEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagEntry::Sync(t) => f.debug_tuple("Sync").field(&t.key).finish(),
            TagEntry::Async(t) => f.debug_tuple("Async").field(&t.key).field(&t.kind).finish(),
        }
    }
}

/// Ordered set of tag entries for one session.
pub struct Registry {
    entries: Vec<TagEntry>,
}

impl Registry {
    /// Builds the lookup order: user entries first, then the built-ins
    /// unless the session opted out of them.
    pub(crate) fn build(user: Vec<TagEntry>, include_builtins: bool) -> Self {
        let mut entries = user;
        if include_builtins {
            entries.extend([
                builtin::bigint(),
                builtin::error(),
                builtin::promise(),
                builtin::stream(),
            ]);
        }
        Self { entries }
    }

    /// First entry whose test accepts the value, in registration order.
    pub fn match_fold(&self, value: &Value) -> Option<&TagEntry> {
        self.entries.iter().find(|e| e.test(value))
    }

    /// Strict lookup by wire key.
    pub fn by_key(&self, key: &str) -> Option<&TagEntry> {
        self.entries.iter().find(|e| e.key() == key)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

/// Built-in entries for the value kinds the crate ships.
pub(crate) mod builtin {
    use super::*;
    use crate::value::Map;

    pub(crate) const BIGINT_KEY: &str = "bigint";
    pub(crate) const ERROR_KEY: &str = "Error";
    pub(crate) const PROMISE_KEY: &str = "Promise";
    pub(crate) const STREAM_KEY: &str = "Stream";

    pub(crate) fn bigint() -> TagEntry {
        TagEntry::Sync(SyncTag::new(
            BIGINT_KEY,
            |v| matches!(v, Value::BigInt(_)),
            |v| match v {
                Value::BigInt(n) => Ok(Value::String(n.to_string())),
                other => Err(EncodeError::UnknownTag { kind: other.kind() }),
            },
            |payload| match payload {
                Value::String(s) => s
                    .parse::<i128>()
                    .map(Value::BigInt)
                    .map_err(|_| DecodeError::protocol(format!("bad bigint payload '{s}'"))),
                other => Err(DecodeError::protocol(format!(
                    "bigint payload must be a string, got {}",
                    other.kind()
                ))),
            },
        ))
    }

    pub(crate) fn error() -> TagEntry {
        TagEntry::Sync(SyncTag::new(
            ERROR_KEY,
            |v| matches!(v, Value::Error(_)),
            |v| match v {
                Value::Error(f) => Ok(fault_to_payload(&f)),
                other => Err(EncodeError::UnknownTag { kind: other.kind() }),
            },
            |payload| fault_from_payload(payload).map(Value::Error),
        ))
    }

    pub(crate) fn promise() -> TagEntry {
        TagEntry::Async(AsyncTag::new(
            PROMISE_KEY,
            ProducerKind::SingleShot,
            |v| matches!(v, Value::Promise(_)),
        ))
    }

    pub(crate) fn stream() -> TagEntry {
        TagEntry::Async(AsyncTag::new(
            STREAM_KEY,
            ProducerKind::MultiShot,
            |v| matches!(v, Value::Stream(_)),
        ))
    }

    /// Wire shape of a fault: `{"name": ..., "message": ...}`.
    pub(crate) fn fault_to_payload(fault: &Fault) -> Value {
        let (name, message) = match fault {
            Fault::User { name, message } => (name.clone(), message.clone()),
            Fault::Interrupted => ("StreamInterrupted".into(), fault.to_string()),
            Fault::Protocol(reason) => ("ProtocolError".into(), reason.clone()),
        };
        let mut m = Map::new();
        m.insert("name".into(), Value::String(name));
        m.insert("message".into(), Value::String(message));
        Value::Object(m)
    }

    pub(crate) fn fault_from_payload(payload: Value) -> Result<Fault, DecodeError> {
        let mut payload = payload;
        let name = payload
            .take("name")
            .and_then(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .ok_or_else(|| DecodeError::protocol("error payload without a name"))?;
        let message = payload
            .take("message")
            .and_then(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .unwrap_or_default();
        Ok(match name.as_str() {
            "StreamInterrupted" => Fault::Interrupted,
            "ProtocolError" => Fault::Protocol(message),
            _ => Fault::User { name, message },
        })
    }
}
