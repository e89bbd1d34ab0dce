//! Events a room session reports to UI collaborators.
//!
//! Every change a consumer might render (a new message, the connection
//! indicator flipping, the session closing) is emitted as a
//! [`SessionEvent`] through the session's [`super::SessionEventBus`].

use serde::Serialize;

use super::{ChatMessage, RoomId};

/// Event emitted by a room session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A message not seen before was appended to the room's list.
    MessageReceived {
        /// Room identifier.
        room_id: RoomId,
        /// The appended message.
        message: ChatMessage,
    },

    /// The shared connection went up or down.
    ConnectionChanged {
        /// Room identifier.
        room_id: RoomId,
        /// New connection state.
        connected: bool,
    },

    /// The session was closed; no further events follow.
    Closed {
        /// Room identifier.
        room_id: RoomId,
    },
}

impl SessionEvent {
    /// Returns the room this event belongs to.
    #[must_use]
    pub const fn room_id(&self) -> RoomId {
        match self {
            Self::MessageReceived { room_id, .. }
            | Self::ConnectionChanged { room_id, .. }
            | Self::Closed { room_id } => *room_id,
        }
    }

    /// Returns the event type as a static string slice.
    #[must_use]
    pub const fn event_type_str(&self) -> &'static str {
        match self {
            Self::MessageReceived { .. } => "message_received",
            Self::ConnectionChanged { .. } => "connection_changed",
            Self::Closed { .. } => "closed",
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::UserId;

    #[test]
    fn message_event_serializes_with_tag() {
        let event = SessionEvent::MessageReceived {
            room_id: RoomId::new(101),
            message: ChatMessage::new(RoomId::new(101), UserId::new(5), "hi"),
        };
        let json = serde_json::to_string(&event).unwrap_or_default();
        assert!(json.contains("\"event_type\":\"message_received\""));
        assert!(json.contains("\"content\":\"hi\""));
    }

    #[test]
    fn room_id_accessor() {
        let event = SessionEvent::ConnectionChanged {
            room_id: RoomId::new(3),
            connected: false,
        };
        assert_eq!(event.room_id(), RoomId::new(3));
        assert_eq!(event.event_type_str(), "connection_changed");
    }
}
