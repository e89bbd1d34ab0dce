//! REST collaborator: room history and private room creation.
//!
//! The messaging core only consumes these two endpoints. [`ChatApi`] is the
//! seam; [`RestChatApi`] is the `reqwest` implementation.

pub mod dto;
pub mod rest;

use std::future::Future;

pub use rest::RestChatApi;

use crate::domain::{ChatMessage, RoomId, UserId};
use crate::error::RealtimeError;

/// Chat endpoints of the REST backend.
pub trait ChatApi: Send + Sync {
    /// Stored messages of `room_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Http`] on transport failures, non-success
    /// statuses or an envelope without data.
    fn fetch_history(
        &self,
        room_id: RoomId,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, RealtimeError>> + Send;

    /// Creates (or returns the existing) private room between two users.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Http`] when the backend refuses the request.
    fn create_private_room(
        &self,
        user_a: UserId,
        user_b: UserId,
    ) -> impl Future<Output = Result<RoomId, RealtimeError>> + Send;
}
