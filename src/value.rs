//! # The value tree the protocol serializes.
//!
//! [`Value`] is plain JSON extended with the richer kinds the wire protocol
//! preserves: wide integers, typed errors as data, and the two live producer
//! kinds ([`Promise`], [`ValueStream`]). Values are owned trees; sharing and
//! cycles are not representable, which is what lets the encoder walk them
//! without an identity table.

use std::collections::BTreeMap;

use serde_json::Number;

use crate::error::Fault;
use crate::handle::{Promise, ValueStream};

/// Object representation. Keys are ordered deterministically.
pub type Map = BTreeMap<String, Value>;

/// # A JSON value extended with live asynchronous producers.
///
/// The plain kinds (`Null` through `Object`) round-trip through
/// [`serde_json::Value`]. `BigInt` and `Error` ride the wire as sync-tagged
/// payloads. `Promise` and `Stream` serialize as placeholders whose events
/// follow in the tail of the frame.
#[derive(Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    /// Wide integer that a plain JSON number cannot carry losslessly.
    BigInt(i128),
    Array(Vec<Value>),
    Object(Map),
    /// A typed error as data (not a failure of the session itself).
    Error(Fault),
    /// Single-shot asynchronous producer.
    Promise(Promise),
    /// Multi-shot asynchronous producer.
    Stream(ValueStream),
}

impl Value {
    /// Builds an object value from key/value pairs.
    pub fn object<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Object(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Builds an array value.
    pub fn array<I: IntoIterator<Item = Value>>(items: I) -> Self {
        Value::Array(items.into_iter().collect())
    }

    /// Short name of the value's kind, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::BigInt(_) => "bigint",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Error(_) => "error",
            Value::Promise(_) => "promise",
            Value::Stream(_) => "stream",
        }
    }

    /// True for the live producer kinds.
    pub fn is_async(&self) -> bool {
        matches!(self, Value::Promise(_) | Value::Stream(_))
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_bigint(&self) -> Option<i128> {
        match self {
            Value::BigInt(n) => Some(*n),
            _ => None,
        }
    }

    /// Member lookup on objects; `None` on every other kind.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Object(m) => m.get(key),
            _ => None,
        }
    }

    /// Moves a member out of an object.
    pub fn take(&mut self, key: &str) -> Option<Value> {
        match self {
            Value::Object(m) => m.remove(key),
            _ => None,
        }
    }

    /// Converts a tree without live producers into plain JSON.
    ///
    /// Returns `None` if the tree contains a `Promise`, `Stream`, `BigInt`
    /// or `Error` anywhere, since those have no lossless plain form.
    pub fn to_plain_json(&self) -> Option<serde_json::Value> {
        match self {
            Value::Null => Some(serde_json::Value::Null),
            Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
            Value::Number(n) => Some(serde_json::Value::Number(n.clone())),
            Value::String(s) => Some(serde_json::Value::String(s.clone())),
            Value::Array(items) => items
                .iter()
                .map(Value::to_plain_json)
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            Value::Object(m) => m
                .iter()
                .map(|(k, v)| v.to_plain_json().map(|j| (k.clone(), j)))
                .collect::<Option<serde_json::Map<_, _>>>()
                .map(serde_json::Value::Object),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(j: serde_json::Value) -> Self {
        match j {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(m) => {
                Value::Object(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n.into())
    }
}

impl From<f64> for Value {
    /// Non-finite floats become `Null`, as in JSON text.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

impl From<i128> for Value {
    fn from(n: i128) -> Self {
        Value::BigInt(n)
    }
}

impl From<Fault> for Value {
    fn from(f: Fault) -> Self {
        Value::Error(f)
    }
}

impl From<Promise> for Value {
    fn from(p: Promise) -> Self {
        Value::Promise(p)
    }
}

impl From<ValueStream> for Value {
    fn from(s: ValueStream) -> Self {
        Value::Stream(s)
    }
}

impl PartialEq for Value {
    /// Structural equality on the plain kinds. Live producer kinds never
    /// compare equal: their pending contents cannot be inspected.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::BigInt(a), Value::BigInt(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Error(a), Value::Error(b)) => a == b,
            _ => false,
        }
    }
}
