//! # Session configuration.
//!
//! [`Config`] defines a session's behavior on both sides of the wire: the
//! tag entries in lookup order, the nonce source, guard predicates, the fold
//! depth limit, chunk buffering, and the cancellation token that aborts
//! in-flight work.
//!
//! # Example
//! ```
//! use tson::{Config, nonce};
//!
//! let mut cfg = Config::default();
//! cfg.nonce = nonce::fixed("__tson");
//! cfg.fold_depth_limit = 64;
//!
//! assert_eq!(cfg.fold_depth_limit, 64);
//! ```

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::nonce::{default_nonce, NonceFn};
use crate::types::TagEntry;
use crate::value::Value;

/// Unary predicate applied to every folded and unfolded tag payload.
/// Returning `false` rejects the payload at that site.
pub type Guard = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Configuration for one serialization/deserialization session.
///
/// Controls the tag registry, nonce generation, guard predicates, recursion
/// and buffering limits, and cancellation.
#[derive(Clone)]
pub struct Config {
    /// User tag entries, consulted before the built-ins in the given order.
    pub types: Vec<TagEntry>,
    /// Whether the built-in entries (bigint, Error, Promise, Stream) are
    /// appended after the user entries.
    pub include_builtins: bool,
    /// Fresh-nonce source, invoked once per `stringify` call.
    pub nonce: NonceFn,
    /// Guards applied to every tag payload on both sides.
    pub guards: Vec<Guard>,
    /// Maximum fold recursion depth before the session aborts.
    pub fold_depth_limit: usize,
    /// Capacity of the outgoing chunk channel; a full channel suspends the
    /// drain loop until the sink catches up.
    pub chunk_capacity: usize,
    /// Cancels in-flight serialization and parsing for this session.
    pub cancel: CancellationToken,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - built-ins included, no user types or guards
    /// - UUID (or random hex) nonces
    /// - `fold_depth_limit = 128`
    /// - `chunk_capacity = 64`
    fn default() -> Self {
        Self {
            types: Vec::new(),
            include_builtins: true,
            nonce: Arc::new(default_nonce),
            guards: Vec::new(),
            fold_depth_limit: 128,
            chunk_capacity: 64,
            cancel: CancellationToken::new(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("types", &self.types.len())
            .field("include_builtins", &self.include_builtins)
            .field("guards", &self.guards.len())
            .field("fold_depth_limit", &self.fold_depth_limit)
            .field("chunk_capacity", &self.chunk_capacity)
            .finish()
    }
}
