//! Data Transfer Objects for the REST collaborator.
//!
//! Field names follow the backend's camelCase JSON. Every response is
//! wrapped in an [`ApiEnvelope`].

pub mod chat_dto;
pub mod common_dto;

pub use chat_dto::*;
pub use common_dto::*;
