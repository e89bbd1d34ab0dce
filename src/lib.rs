//! # teamup-realtime
//!
//! Real-time chat transport and normalized entity cache for the TeamUp
//! project-matching client.
//!
//! One physical connection, owned by a [`connection::ConnectionManager`],
//! carries every chat room. Rooms are addressed by a broadcast topic (team
//! chat) or a point-to-point queue (1:1 chat). Consumer subscriptions are
//! recorded in a registry and replayed after every reconnect, so a room
//! session keeps receiving across transient disconnects without
//! resubscribing. The transport is pluggable: an in-process stub for
//! offline work, or STOMP over WebSocket against the live broker.
//!
//! ## Architecture
//!
//! ```text
//! UI collaborators
//!     │
//!     ├── ChatClient (client)          composition root
//!     │
//!     ├── RoomSession (session/)       per-room state machine, dedup log
//!     ├── EntityCache (cache/)         teams + users, TTL staleness
//!     │
//!     ├── ConnectionManager (connection/)
//!     │       ├── SubscriptionRegistry
//!     │       └── ReconnectPolicy
//!     │
//!     ├── Transport (transport/)       stub | STOMP over WebSocket
//!     └── RestChatApi (api/)           history, private rooms
//! ```

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod domain;
pub mod error;
pub mod session;
pub mod telemetry;
pub mod transport;

pub use client::ChatClient;
pub use config::RealtimeConfig;
pub use error::RealtimeError;
