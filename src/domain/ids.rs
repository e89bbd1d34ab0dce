//! Type-safe identifiers.
//!
//! The backend keys rooms, users and teams by 64-bit integers. Each gets a
//! newtype so a room id cannot be passed where a user id is expected.
//! [`MessageId`] is a string because the stub transport and the
//! missing-id fallback generate UUIDs while the broker sends integers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps a raw backend identifier.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw backend identifier.
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }
    };
}

numeric_id!(
    /// Identifier of a chat room (group or direct).
    RoomId
);

numeric_id!(
    /// Identifier of a user.
    UserId
);

numeric_id!(
    /// Identifier of a project team.
    TeamId
);

/// Unique identifier of a delivered chat message within its room.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Creates a random message id (UUID v4), used when the source did not
    /// assign one.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<i64> for MessageId {
    fn from(raw: i64) -> Self {
        Self(raw.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_display_raw_value() {
        assert_eq!(RoomId::new(101).to_string(), "101");
        assert_eq!(UserId::from(5).get(), 5);
    }

    #[test]
    fn numeric_ids_parse_from_str() {
        let Ok(id) = "42".parse::<TeamId>() else {
            panic!("valid team id");
        };
        assert_eq!(id, TeamId::new(42));
        assert!("forty-two".parse::<TeamId>().is_err());
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&RoomId::new(7)).unwrap_or_default();
        assert_eq!(json, "7");
        let json = serde_json::to_string(&MessageId::from("abc")).unwrap_or_default();
        assert_eq!(json, "\"abc\"");
    }

    #[test]
    fn generated_message_ids_are_unique() {
        let a = MessageId::generate();
        let b = MessageId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 36);
    }

    #[test]
    fn integer_message_id_matches_string_form() {
        assert_eq!(MessageId::from(42), MessageId::from("42"));
    }
}
