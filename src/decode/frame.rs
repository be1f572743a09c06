//! # Incremental parser for the two-array outer frame.
//!
//! The wire document is `[ <head> , [ <row>, <row>, ... ] ]`. This parser
//! consumes string chunks split at arbitrary byte positions and emits the
//! head, then each tail row as soon as its closing bracket arrives, then one
//! end event when the outer array closes.
//!
//! Elements are cut out of the input by bracket balancing with full JSON
//! string/escape awareness, then handed to [`serde_json`]; only the frame
//! skeleton is parsed by hand. Whitespace between structural tokens is
//! free.

use serde_json::Value as Json;

use crate::error::DecodeError;

/// One structural event of the frame.
#[derive(Debug)]
pub(crate) enum FrameEvent {
    /// The complete head element, `{"json": ..., "nonce": ...}`.
    Head(Json),
    /// One complete tail row, `[id, event]`.
    Row(Json),
    /// The outer array closed; the frame is complete.
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Expect the outer `[`.
    FrameStart,
    /// Expect the head's `{`.
    HeadStart,
    /// Inside the head element.
    Head,
    /// Expect the `,` between head and tail.
    HeadSep,
    /// Expect the tail's `[`.
    TailStart,
    /// Expect a row's `[` or the tail's `]`.
    RowStart,
    /// Inside a row element.
    Row,
    /// Expect `,` before another row or the tail's `]`.
    RowSep,
    /// Expect a row's `[` (a comma was just consumed).
    RowNext,
    /// Expect the outer `]`.
    FrameEnd,
    /// Frame complete; only trailing whitespace is allowed.
    Done,
}

/// Incremental state machine over the frame skeleton.
pub(crate) struct FrameParser {
    state: State,
    elem: String,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl FrameParser {
    pub(crate) fn new() -> Self {
        Self {
            state: State::FrameStart,
            elem: String::new(),
            depth: 0,
            in_string: false,
            escaped: false,
        }
    }

    /// True once the outer array has closed.
    pub(crate) fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Feeds one chunk, appending completed events to `out`.
    pub(crate) fn push(
        &mut self,
        chunk: &str,
        out: &mut Vec<FrameEvent>,
    ) -> Result<(), DecodeError> {
        for c in chunk.chars() {
            self.step(c, out)?;
        }
        Ok(())
    }

    fn step(&mut self, c: char, out: &mut Vec<FrameEvent>) -> Result<(), DecodeError> {
        use State::*;

        if matches!(self.state, Head | Row) {
            self.consume(c);
            if self.depth == 0 {
                let json: Json = serde_json::from_str(&self.elem)?;
                self.elem.clear();
                match self.state {
                    Head => {
                        out.push(FrameEvent::Head(json));
                        self.state = HeadSep;
                    }
                    Row => {
                        out.push(FrameEvent::Row(json));
                        self.state = RowSep;
                    }
                    _ => {}
                }
            }
            return Ok(());
        }

        if c.is_whitespace() {
            return Ok(());
        }

        match (self.state, c) {
            (FrameStart, '[') => self.state = HeadStart,
            (HeadStart, '{') => self.begin_elem(c, Head),
            (HeadSep, ',') => self.state = TailStart,
            (TailStart, '[') => self.state = RowStart,
            (RowStart, '[') | (RowNext, '[') => self.begin_elem(c, Row),
            (RowStart, ']') | (RowSep, ']') => self.state = FrameEnd,
            (RowSep, ',') => self.state = RowNext,
            (FrameEnd, ']') => {
                self.state = Done;
                out.push(FrameEvent::End);
            }
            (Done, _) => {
                return Err(DecodeError::protocol(format!(
                    "trailing data after frame close: '{c}'"
                )));
            }
            (state, other) => {
                return Err(DecodeError::protocol(format!(
                    "unexpected '{other}' in frame ({state:?})"
                )));
            }
        }
        Ok(())
    }

    fn begin_elem(&mut self, c: char, state: State) {
        self.elem.clear();
        self.elem.push(c);
        self.depth = 1;
        self.in_string = false;
        self.escaped = false;
        self.state = state;
    }

    fn consume(&mut self, c: char) {
        self.elem.push(c);
        if self.in_string {
            if self.escaped {
                self.escaped = false;
            } else if c == '\\' {
                self.escaped = true;
            } else if c == '"' {
                self.in_string = false;
            }
        } else {
            match c {
                '"' => self.in_string = true,
                '[' | '{' => self.depth += 1,
                ']' | '}' => self.depth -= 1,
                _ => {}
            }
        }
    }
}
