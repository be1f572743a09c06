//! Producer side: folding the value tree and draining its producers.

mod drive;
mod fold;
mod sse;

pub use drive::ChunkStream;

pub(crate) use drive::spawn_drive;
pub(crate) use fold::FoldCtx;
pub(crate) use sse::sse_stream;
