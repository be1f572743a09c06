//! # Error types used by the tson runtime and handles.
//!
//! This module defines three error types:
//!
//! - [`EncodeError`] errors raised on the producer side, before or while
//!   draining the stream.
//! - [`DecodeError`] errors raised by the incremental parser and dispatcher.
//! - [`Fault`] terminal errors delivered *through* a handle: a producer's own
//!   in-band failure, or the session breaking underneath a pending handle.
//!
//! All types provide `as_label` returning a short stable label for logs.

use thiserror::Error;

/// # Errors produced while serializing a value tree.
///
/// Root-level failures abort `stringify` before any bytes are written.
/// The same failures inside a drained event are converted into an error
/// terminator for that producer and do not tear down its siblings.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum EncodeError {
    /// A value required a tag that is not present in the registry.
    #[error("no registered tag can serialize value of kind '{kind}'")]
    UnknownTag {
        /// Short description of the offending value's kind.
        kind: &'static str,
    },
    /// A guard predicate rejected a folded payload.
    #[error("guard rejected payload for tag '{key}'")]
    GuardRejected {
        /// Key of the tag whose payload was rejected.
        key: String,
    },
    /// The value tree nests deeper than the configured fold depth limit.
    #[error("value nests deeper than the fold limit of {limit}")]
    DepthExceeded {
        /// The configured limit.
        limit: usize,
    },
}

impl EncodeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EncodeError::UnknownTag { .. } => "encode_unknown_tag",
            EncodeError::GuardRejected { .. } => "encode_guard_rejected",
            EncodeError::DepthExceeded { .. } => "encode_depth_exceeded",
        }
    }
}

/// # Errors produced while parsing and dispatching an incoming stream.
///
/// `Syntax` and `Protocol` mean the wire content itself is bad; `Interrupted`
/// means the chunk source ended before the outer frame closed. All three tear
/// down every pending handle on the session.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The source ended before the outer frame closed.
    #[error("stream ended unexpectedly")]
    Interrupted,
    /// The stream violated the frame protocol.
    #[error("protocol violation: {reason}")]
    Protocol {
        /// Human-readable description of the violation.
        reason: String,
    },
    /// A guard predicate rejected a value in the head.
    #[error("guard rejected value for tag '{key}'")]
    GuardRejected {
        /// Key of the tag whose value was rejected.
        key: String,
    },
    /// A frame element was not valid JSON.
    #[error("malformed JSON element: {0}")]
    Syntax(#[from] serde_json::Error),
}

impl DecodeError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            DecodeError::Interrupted => "decode_interrupted",
            DecodeError::Protocol { .. } => "decode_protocol",
            DecodeError::GuardRejected { .. } => "decode_guard_rejected",
            DecodeError::Syntax(_) => "decode_syntax",
        }
    }

    pub(crate) fn protocol(reason: impl Into<String>) -> Self {
        DecodeError::Protocol {
            reason: reason.into(),
        }
    }
}

/// # Terminal error delivered through a handle.
///
/// A `Fault` is **not** a parse failure: it arrives in-band. `User` carries a
/// producer's own rejection or error end; `Interrupted` and `Protocol` are
/// synthesized by the dispatcher when the session breaks while the handle is
/// still pending. Each pending handle observes such a synthesized fault
/// exactly once.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// An error value emitted by the producer itself.
    #[error("{name}: {message}")]
    User {
        /// Error name, e.g. the producer-side type name.
        name: String,
        /// Error message.
        message: String,
    },
    /// The chunk source ended while this handle was still pending.
    #[error("Stream ended unexpectedly")]
    Interrupted,
    /// The stream broke the protocol while this handle was still pending.
    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl Fault {
    /// Builds a `User` fault with the conventional name `"Error"`.
    pub fn msg(message: impl Into<String>) -> Self {
        Fault::User {
            name: "Error".into(),
            message: message.into(),
        }
    }

    /// Builds a `User` fault with an explicit error name.
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Fault::User {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            Fault::User { .. } => "fault_user",
            Fault::Interrupted => "fault_interrupted",
            Fault::Protocol(_) => "fault_protocol",
        }
    }

    /// True for faults synthesized by the session rather than the producer.
    pub fn is_synthetic(&self) -> bool {
        !matches!(self, Fault::User { .. })
    }
}

impl From<EncodeError> for Fault {
    fn from(e: EncodeError) -> Self {
        Fault::User {
            name: "EncodeError".into(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(
            EncodeError::UnknownTag { kind: "promise" }.as_label(),
            "encode_unknown_tag"
        );
        assert_eq!(DecodeError::Interrupted.as_label(), "decode_interrupted");
        assert_eq!(Fault::Interrupted.as_label(), "fault_interrupted");
    }

    #[test]
    fn interrupted_message_is_the_documented_one() {
        assert_eq!(Fault::Interrupted.to_string(), "Stream ended unexpectedly");
    }
}
