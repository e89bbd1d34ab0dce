//! Room addressing.
//!
//! Every room can be reached through two address families: a broadcast
//! address shared by all members of a group room and a point-to-point
//! address used by direct (1:1) rooms. Addresses have a logical string
//! form (`room-broadcast/{roomId}`, `room-queue/{roomId}`) used by
//! consumers and logs, and a broker destination used on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::RoomId;
use crate::error::RealtimeError;

const BROADCAST_PREFIX: &str = "room-broadcast/";
const QUEUE_PREFIX: &str = "room-queue/";
const BROADCAST_DESTINATION: &str = "/topic/chat/room/";
const QUEUE_DESTINATION: &str = "/queue/chat/room/";

/// A subscribable address for one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Address {
    /// Many-to-many group chat topic.
    Broadcast(RoomId),
    /// Point-to-point queue for direct chat.
    Direct(RoomId),
}

impl Address {
    /// Returns the room this address belongs to.
    #[must_use]
    pub const fn room_id(&self) -> RoomId {
        match self {
            Self::Broadcast(id) | Self::Direct(id) => *id,
        }
    }

    /// Returns the broker destination this address subscribes to.
    #[must_use]
    pub fn destination(&self) -> String {
        match self {
            Self::Broadcast(id) => format!("{BROADCAST_DESTINATION}{id}"),
            Self::Direct(id) => format!("{QUEUE_DESTINATION}{id}"),
        }
    }

    /// Maps a broker destination back to an address.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::InvalidAddress`] if the destination does not
    /// belong to either room family.
    pub fn from_destination(destination: &str) -> Result<Self, RealtimeError> {
        if let Some(rest) = destination.strip_prefix(BROADCAST_DESTINATION) {
            return parse_room(rest, destination).map(Self::Broadcast);
        }
        if let Some(rest) = destination.strip_prefix(QUEUE_DESTINATION) {
            return parse_room(rest, destination).map(Self::Direct);
        }
        Err(RealtimeError::InvalidAddress(destination.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Broadcast(id) => write!(f, "{BROADCAST_PREFIX}{id}"),
            Self::Direct(id) => write!(f, "{QUEUE_PREFIX}{id}"),
        }
    }
}

impl FromStr for Address {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(rest) = s.strip_prefix(BROADCAST_PREFIX) {
            return parse_room(rest, s).map(Self::Broadcast);
        }
        if let Some(rest) = s.strip_prefix(QUEUE_PREFIX) {
            return parse_room(rest, s).map(Self::Direct);
        }
        Err(RealtimeError::InvalidAddress(s.to_string()))
    }
}

fn parse_room(raw: &str, whole: &str) -> Result<RoomId, RealtimeError> {
    raw.parse()
        .map_err(|_| RealtimeError::InvalidAddress(whole.to_string()))
}

/// Kind of chat a room session participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatKind {
    /// Team chat: broadcast family only.
    Group,
    /// 1:1 chat: point-to-point family only.
    Direct,
    /// Listen on both families, send as group.
    Any,
}

impl ChatKind {
    /// Addresses a session of this kind listens on for `room_id`.
    #[must_use]
    pub fn addresses(self, room_id: RoomId) -> Vec<Address> {
        match self {
            Self::Group => vec![Address::Broadcast(room_id)],
            Self::Direct => vec![Address::Direct(room_id)],
            Self::Any => vec![Address::Broadcast(room_id), Address::Direct(room_id)],
        }
    }

    /// Destination outbound messages of this kind are sent to.
    #[must_use]
    pub const fn send_destination(self) -> SendDestination {
        match self {
            Self::Group | Self::Any => SendDestination::Group,
            Self::Direct => SendDestination::Direct,
        }
    }
}

/// Outbound destination on the broker's application prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendDestination {
    /// `/app/chat.sendMessage`, fanned out to the room's broadcast topic.
    Group,
    /// `/app/chat.private`, delivered to the room's queue.
    Direct,
}

impl SendDestination {
    /// Broker destination string.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Group => "/app/chat.sendMessage",
            Self::Direct => "/app/chat.private",
        }
    }

    /// Address on which the broker delivers messages sent here for `room_id`.
    #[must_use]
    pub const fn delivery_address(self, room_id: RoomId) -> Address {
        match self {
            Self::Group => Address::Broadcast(room_id),
            Self::Direct => Address::Direct(room_id),
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn logical_names_follow_convention() {
        let room = RoomId::new(101);
        assert_eq!(Address::Broadcast(room).to_string(), "room-broadcast/101");
        assert_eq!(Address::Direct(room).to_string(), "room-queue/101");
    }

    #[test]
    fn parse_logical_name() {
        let Ok(addr) = "room-queue/9".parse::<Address>() else {
            panic!("valid address");
        };
        assert_eq!(addr, Address::Direct(RoomId::new(9)));
        assert!("room-queue/abc".parse::<Address>().is_err());
        assert!("lobby/1".parse::<Address>().is_err());
    }

    #[test]
    fn destinations_map_both_ways() {
        let addr = Address::Broadcast(RoomId::new(3));
        assert_eq!(addr.destination(), "/topic/chat/room/3");
        let Ok(back) = Address::from_destination(&addr.destination()) else {
            panic!("destination should map back");
        };
        assert_eq!(back, addr);
        assert!(Address::from_destination("/topic/other/3").is_err());
    }

    #[test]
    fn chat_kind_selects_families() {
        let room = RoomId::new(1);
        assert_eq!(ChatKind::Group.addresses(room), vec![Address::Broadcast(room)]);
        assert_eq!(ChatKind::Direct.addresses(room), vec![Address::Direct(room)]);
        assert_eq!(ChatKind::Any.addresses(room).len(), 2);
        assert_eq!(ChatKind::Direct.send_destination(), SendDestination::Direct);
        assert_eq!(ChatKind::Any.send_destination().path(), "/app/chat.sendMessage");
    }

    #[test]
    fn send_destination_delivers_to_matching_family() {
        let room = RoomId::new(4);
        assert_eq!(
            SendDestination::Direct.delivery_address(room),
            Address::Direct(room)
        );
        assert_eq!(
            SendDestination::Group.delivery_address(room),
            Address::Broadcast(room)
        );
    }
}
