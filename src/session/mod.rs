//! Room-scoped sessions over the shared connection.

pub mod log;
pub mod room;

pub use log::MessageLog;
pub use room::{RoomSession, RoomSpec, SessionState};
