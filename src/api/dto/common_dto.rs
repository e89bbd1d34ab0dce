//! Response envelope shared by every REST endpoint.

use serde::{Deserialize, Serialize};

use crate::error::RealtimeError;

/// `{ status, message, data }` wrapper around every REST payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    /// HTTP-like status echoed in the body.
    #[serde(default)]
    pub status: u16,
    /// Human-readable outcome.
    #[serde(default)]
    pub message: String,
    /// Payload; absent on errors and on empty results.
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Wraps `data` in a 200 envelope.
    #[must_use]
    pub fn ok(data: T) -> Self {
        Self {
            status: 200,
            message: "ok".to_string(),
            data: Some(data),
        }
    }

    /// Returns the payload.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Http`] carrying the envelope's message when
    /// `data` is missing.
    pub fn into_data(self) -> Result<T, RealtimeError> {
        self.data.ok_or_else(|| {
            RealtimeError::Http(format!(
                "response without data (status {}): {}",
                self.status, self.message
            ))
        })
    }
}
