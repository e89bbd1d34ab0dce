//! Domain layer: identifiers, messages, addressing and session events.
//!
//! These types are shared by the transports, the connection manager and
//! the room sessions. None of them perform I/O.

pub mod address;
pub mod event_bus;
pub mod ids;
pub mod message;
pub mod session_event;

pub use address::{Address, ChatKind, SendDestination};
pub use event_bus::SessionEventBus;
pub use ids::{MessageId, RoomId, TeamId, UserId};
pub use message::{ChatMessage, MessageKind, OutboundMessage};
pub use session_event::SessionEvent;
