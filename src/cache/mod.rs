//! Normalized client-side entity cache with TTL staleness.

pub mod clock;
pub mod entities;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entities::{EntityCache, Team, TeamDetail, TeamView, User};
pub use store::{CacheEntry, DEFAULT_TTL, Entity, EntityStore};
