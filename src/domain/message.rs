//! Chat message types: delivered messages, outbound payloads and the
//! broker's inbound wire shape.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MessageId, RoomId, UserId};
use crate::error::RealtimeError;

/// A chat message as delivered to room consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Unique within the room's delivered set.
    pub id: MessageId,
    /// Room the message was posted to.
    pub room_id: RoomId,
    /// Author of the message; resolve through the entity cache for display.
    pub sender_id: UserId,
    /// Message text.
    pub content: String,
    /// Server creation time (or local arrival time when absent).
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Creates a message with a generated id stamped with the current time.
    #[must_use]
    pub fn new(room_id: RoomId, sender_id: UserId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            room_id,
            sender_id,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Decodes a broker message body.
    ///
    /// `fallback_room` is used when the body omits `chatRoomId`; a missing
    /// `id` is replaced by a generated one and a missing `createdAt` by the
    /// arrival time.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Payload`] if the body is not the expected
    /// JSON shape and [`RealtimeError::MalformedFrame`] if `createdAt` is
    /// present but unparseable.
    pub fn from_wire(body: &str, fallback_room: RoomId) -> Result<Self, RealtimeError> {
        let wire: InboundMessage = serde_json::from_str(body)?;
        let timestamp = match wire.created_at.as_deref() {
            Some(raw) => parse_timestamp(raw)?,
            None => Utc::now(),
        };
        Ok(Self {
            id: wire.id.map_or_else(MessageId::generate, RawId::into_message_id),
            room_id: wire.chat_room_id.unwrap_or(fallback_room),
            sender_id: wire.sender_id,
            content: wire.message.unwrap_or_default(),
            timestamp,
        })
    }
}

/// Body the broker publishes on room destinations.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InboundMessage {
    #[serde(default)]
    id: Option<RawId>,
    #[serde(default)]
    chat_room_id: Option<RoomId>,
    sender_id: UserId,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
}

/// The broker sends numeric ids; other producers may send strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawId {
    Int(i64),
    Text(String),
}

impl RawId {
    fn into_message_id(self) -> MessageId {
        match self {
            Self::Int(n) => MessageId::from(n),
            Self::Text(s) => MessageId::from(s),
        }
    }
}

/// Parses an RFC 3339 timestamp, or a zone-less local timestamp which is
/// taken as UTC.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RealtimeError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| RealtimeError::MalformedFrame(format!("bad timestamp {raw:?}: {e}")))
}

/// Message type discriminator understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Regular chat text.
    Chat,
    /// Member entered the room.
    Join,
    /// Member left the room.
    Leave,
}

/// Payload published to a send destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Message type.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Target room.
    pub room_id: RoomId,
    /// Author.
    pub sender_id: UserId,
    /// Message text; carried under the backend's `message` key.
    #[serde(rename = "message")]
    pub content: String,
}

impl OutboundMessage {
    /// Builds a regular chat message.
    #[must_use]
    pub fn chat(room_id: RoomId, sender_id: UserId, content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Chat,
            room_id,
            sender_id,
            content: content.into(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn decodes_broker_body() {
        let body = r#"{"id":123,"chatRoomId":1,"senderId":5,"message":"hi","createdAt":"2024-01-15T10:30:00"}"#;
        let Ok(msg) = ChatMessage::from_wire(body, RoomId::new(99)) else {
            panic!("valid body");
        };
        assert_eq!(msg.id, MessageId::from(123));
        assert_eq!(msg.room_id, RoomId::new(1));
        assert_eq!(msg.sender_id, UserId::new(5));
        assert_eq!(msg.content, "hi");
        assert_eq!(msg.timestamp.year(), 2024);
        assert_eq!(msg.timestamp.hour(), 10);
    }

    #[test]
    fn missing_fields_use_fallbacks() {
        let body = r#"{"senderId":5}"#;
        let Ok(msg) = ChatMessage::from_wire(body, RoomId::new(99)) else {
            panic!("sparse body should decode");
        };
        assert_eq!(msg.room_id, RoomId::new(99));
        assert_eq!(msg.content, "");
        assert_eq!(msg.id.as_str().len(), 36);
    }

    #[test]
    fn string_ids_are_kept() {
        let body = r#"{"id":"abc-1","senderId":5,"message":"x"}"#;
        let Ok(msg) = ChatMessage::from_wire(body, RoomId::new(1)) else {
            panic!("valid body");
        };
        assert_eq!(msg.id.as_str(), "abc-1");
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(ChatMessage::from_wire("not json", RoomId::new(1)).is_err());
        assert!(ChatMessage::from_wire(r#"{"message":"no sender"}"#, RoomId::new(1)).is_err());
        let bad_ts = r#"{"senderId":1,"createdAt":"yesterday"}"#;
        assert!(matches!(
            ChatMessage::from_wire(bad_ts, RoomId::new(1)),
            Err(RealtimeError::MalformedFrame(_))
        ));
    }

    #[test]
    fn rfc3339_timestamps_are_converted_to_utc() {
        let Ok(ts) = parse_timestamp("2024-01-15T19:30:00+09:00") else {
            panic!("valid timestamp");
        };
        assert_eq!(ts.hour(), 10);
    }

    #[test]
    fn outbound_uses_backend_field_names() {
        let msg = OutboundMessage::chat(RoomId::new(101), UserId::new(5), "hi");
        let Ok(value) = serde_json::to_value(&msg) else {
            panic!("serializable");
        };
        assert_eq!(
            value,
            serde_json::json!({"type": "CHAT", "roomId": 101, "senderId": 5, "message": "hi"})
        );
    }
}
