//! Connection layer: the shared physical link and its subscriptions.
//!
//! - [`ConnectionManager`]: connect/disconnect lifecycle, listeners,
//!   consumer counting, reconnect supervision.
//! - [`SubscriptionRegistry`]: wanted addresses and their consumers.
//! - [`ReconnectPolicy`]: delay schedule between reconnect attempts.

pub mod manager;
pub mod reconnect;
pub mod registry;

pub use manager::{ConnectionListener, ConnectionManager, ListenerId, ManagerConfig};
pub use reconnect::{ReconnectPolicy, ReconnectStrategy};
pub use registry::{Removal, SubscriptionId, SubscriptionInfo, SubscriptionRegistry};
