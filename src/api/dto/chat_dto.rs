//! Chat room DTOs: history entries and private room creation.

use serde::{Deserialize, Serialize};

use crate::domain::message::parse_timestamp;
use crate::domain::{ChatMessage, MessageId, RoomId, TeamId, UserId};
use crate::error::RealtimeError;

/// One stored message as returned by the room history endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Server-assigned message id.
    pub id: i64,
    /// Room the message belongs to.
    #[serde(default)]
    pub chat_room_id: Option<RoomId>,
    /// Author.
    pub sender_id: UserId,
    /// Message text.
    #[serde(default)]
    pub message: String,
    /// Creation time, RFC 3339 or zone-less local time.
    pub created_at: String,
}

impl HistoryEntry {
    /// Converts into a delivered message, using `room_id` when the entry
    /// does not name its room.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::MalformedFrame`] if `createdAt` cannot be
    /// parsed.
    pub fn into_message(self, room_id: RoomId) -> Result<ChatMessage, RealtimeError> {
        Ok(ChatMessage {
            id: MessageId::from(self.id),
            room_id: self.chat_room_id.unwrap_or(room_id),
            sender_id: self.sender_id,
            content: self.message,
            timestamp: parse_timestamp(&self.created_at)?,
        })
    }
}

/// Chat room kind understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomType {
    /// Room attached to a team.
    Team,
    /// One-to-one room.
    Private,
}

/// Body of `POST /chatroom/private`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePrivateRoomRequest {
    /// Always [`RoomType::Private`].
    pub room_type: RoomType,
    /// First participant.
    pub user1_id: UserId,
    /// Second participant.
    pub user2_id: UserId,
}

impl CreatePrivateRoomRequest {
    /// Builds a request for a room between `a` and `b`.
    #[must_use]
    pub const fn new(a: UserId, b: UserId) -> Self {
        Self {
            room_type: RoomType::Private,
            user1_id: a,
            user2_id: b,
        }
    }
}

/// Room returned by the creation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomResponse {
    /// Id used to derive the room's addresses.
    pub room_id: RoomId,
    /// Room kind.
    pub room_type: RoomType,
    /// Owning team, for team rooms.
    #[serde(default)]
    pub team_id: Option<TeamId>,
}
