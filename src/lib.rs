//! # tson
//!
//! **tson** is a streaming serialization library that extends JSON with
//! richer value semantics (wide integers, typed errors, user-defined tags)
//! and, most importantly, *live* asynchronous producers: single-shot
//! promises and multi-shot value streams that keep settling while the bytes
//! are still in flight.
//!
//! A producer serializes a root whose subtree may contain any number of
//! pending promises and streams; the consumer gets an equivalent tree back
//! as soon as the head of the frame arrives, with each producer replaced by
//! a live handle that resolves or yields as tail rows are delivered.
//!
//! ## Features
//!
//! | Area              | Description                                                | Key types / traits                  |
//! |-------------------|------------------------------------------------------------|-------------------------------------|
//! | **Values**        | JSON plus bigints, typed errors and live producers.        | [`Value`], [`Promise`], [`ValueStream`] |
//! | **Tags**          | User sync transformations and the built-in entries.        | [`TagEntry`], [`SyncTag`], [`Registry`] |
//! | **Producer side** | Fold the tree, multiplex producer events onto one stream.  | [`Tson::stringify`], [`ChunkStream`] |
//! | **Consumer side** | Incremental parse, dispatch rows to live handles.          | [`Tson::parse`]                     |
//! | **Observability** | Hook into producer faults and interruptions.               | [`StreamObserver`], [`TraceObserver`] |
//! | **Errors**        | Typed errors for both sides and for in-band faults.        | [`EncodeError`], [`DecodeError`], [`Fault`] |
//!
//! ## Optional features
//! - `uuid-nonce` *(default)*: session nonces are UUID v4 strings; without
//!   it, random hex scalars.
//!
//! ```no_run
//! use tson::{nonce, Config, NoopObserver, Promise, Tson, Value};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.nonce = nonce::fixed("__tson");
//!     let tson = Tson::new(cfg, NoopObserver);
//!
//!     let root = Value::object([
//!         ("greeting", Value::from("hello")),
//!         ("later", Value::Promise(Promise::resolved(Value::from(42i64)))),
//!     ]);
//!
//!     // Producer side: an async sequence of UTF-8 frame chunks.
//!     let chunks = tson.stringify(root)?;
//!
//!     // Consumer side: resolves as soon as the head is parsed.
//!     let mut parsed = tson.parse(chunks).await?;
//!
//!     assert_eq!(parsed.get("greeting").and_then(Value::as_str), Some("hello"));
//!     if let Some(Value::Promise(later)) = parsed.take("later") {
//!         assert_eq!(later.value().await?.as_i64(), Some(42));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ---

mod config;
mod decode;
mod encode;
mod error;
mod handle;
pub mod nonce;
mod observer;
mod session;
mod types;
mod value;

// ---- Public re-exports ----

pub use config::{Config, Guard};
pub use encode::ChunkStream;
pub use error::{DecodeError, EncodeError, Fault};
pub use handle::{Promise, PromiseSlot, Settled, ValueStream};
pub use nonce::NonceFn;
pub use observer::{NoopObserver, StreamObserver, TraceObserver};
pub use session::Tson;
pub use types::{AsyncTag, ProducerId, ProducerKind, Registry, SyncTag, TagEntry};
pub use value::{Map, Value};
