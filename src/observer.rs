//! # Observing session faults.
//!
//! A [`StreamObserver`] receives out-of-band notifications about a session:
//! producer-side drain faults (a producer's fold failed and was converted to
//! an error terminator) and consumer-side interruption (the source ended or
//! broke the protocol with handles still pending). In-band producer errors,
//! rejections and error ends, go to the corresponding handle, never here.

use async_trait::async_trait;

use crate::error::{DecodeError, EncodeError};
use crate::types::ProducerId;

/// Hook into session-level faults.
///
/// All methods default to no-ops; implement only what you need.
#[async_trait]
pub trait StreamObserver: Send + Sync {
    /// Producer side: folding an event of producer `id` failed. The fault
    /// was converted into an error terminator for that producer and its
    /// siblings keep draining.
    async fn on_producer_fault(&self, id: ProducerId, error: &EncodeError) {
        let _ = (id, error);
    }

    /// Consumer side: the session broke with handles still pending. Invoked
    /// exactly once per session.
    async fn on_interrupted(&self, error: &DecodeError) {
        let _ = error;
    }
}

/// Observer that ignores every notification.
pub struct NoopObserver;

#[async_trait]
impl StreamObserver for NoopObserver {}

/// Observer that logs faults through [`tracing`].
pub struct TraceObserver;

#[async_trait]
impl StreamObserver for TraceObserver {
    async fn on_producer_fault(&self, id: ProducerId, error: &EncodeError) {
        tracing::warn!(id, label = error.as_label(), %error, "producer fault");
    }

    async fn on_interrupted(&self, error: &DecodeError) {
        tracing::warn!(label = error.as_label(), %error, "session interrupted");
    }
}
