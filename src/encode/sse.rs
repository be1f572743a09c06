//! # Server-Sent Events reframing.
//!
//! Wraps a frame's chunk stream so that every line of the underlying wire
//! text becomes one `data:` record. Chunk boundaries need not align with
//! line boundaries; partial lines are buffered until their newline arrives.

use futures::{stream, Stream, StreamExt};

use crate::encode::drive::ChunkStream;

struct SseState {
    chunks: ChunkStream,
    buf: String,
    done: bool,
}

/// One `data:` record per line of the underlying frame.
pub(crate) fn sse_stream(chunks: ChunkStream) -> impl Stream<Item = String> + Send {
    let state = SseState {
        chunks,
        buf: String::new(),
        done: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.find('\n') {
                let line: String = st.buf.drain(..=pos).collect();
                let line = line.trim_end_matches('\n');
                if line.is_empty() {
                    continue;
                }
                return Some((format!("data: {line}\n\n"), st));
            }
            if st.done {
                if st.buf.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut st.buf);
                return Some((format!("data: {line}\n\n"), st));
            }
            match st.chunks.next().await {
                Some(chunk) => st.buf.push_str(&chunk),
                None => st.done = true,
            }
        }
    })
}
