//! # Session nonce source.
//!
//! Every serialization session stamps a fresh scalar nonce into the head and
//! echoes it in each placeholder, so a consumer can tell protocol tuples
//! from user arrays that happen to share their shape. The default source
//! produces UUID v4 strings; without the `uuid-nonce` feature it falls back
//! to a random hex scalar.

use std::sync::Arc;

use serde_json::Value as Json;

/// Produces one fresh nonce per session. Must return a JSON scalar.
pub type NonceFn = Arc<dyn Fn() -> Json + Send + Sync>;

/// A random 64-bit hex scalar.
pub fn scalar_nonce() -> Json {
    Json::String(format!("{:016x}", rand::random::<u64>()))
}

/// A UUID v4 string nonce.
#[cfg(feature = "uuid-nonce")]
pub fn uuid_nonce() -> Json {
    Json::String(uuid::Uuid::new_v4().simple().to_string())
}

/// The default per-session source.
pub(crate) fn default_nonce() -> Json {
    #[cfg(feature = "uuid-nonce")]
    {
        uuid_nonce()
    }
    #[cfg(not(feature = "uuid-nonce"))]
    {
        scalar_nonce()
    }
}

/// A source that always returns the same nonce. Intended for tests and for
/// wire formats pinned by an external contract.
pub fn fixed(nonce: impl Into<Json>) -> NonceFn {
    let nonce = nonce.into();
    Arc::new(move || nonce.clone())
}
