mod change_event;

pub use change_event::{classify, ChangeEvent, DecodeError, EventId};
