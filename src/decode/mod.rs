//! Consumer side: incremental frame parsing and event dispatch.

mod dispatch;
mod frame;

pub(crate) use dispatch::Dispatcher;
pub(crate) use frame::{FrameEvent, FrameParser};
