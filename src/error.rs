//! Realtime error types with stable numeric codes.
//!
//! [`RealtimeError`] is the central error type for the crate. Each variant
//! maps to a numeric code so UI collaborators can branch on a category
//! without matching on message text, and to a recoverability flag that
//! tells callers whether retrying after a reconnect can succeed.

use std::time::Duration;

/// Crate-wide result alias.
pub type Result<T, E = RealtimeError> = std::result::Result<T, E>;

/// Errors surfaced by the transport, connection, session, cache and API
/// layers.
///
/// # Error Code Ranges
///
/// | Range     | Category              |
/// |-----------|-----------------------|
/// | 1000–1999 | Caller / session state |
/// | 2000–2999 | Transport / socket    |
/// | 3000–3999 | Payload / framing     |
/// | 4000–4999 | REST collaborator     |
/// | 5000–5999 | Configuration         |
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// An operation that needs a live connection was attempted while
    /// disconnected.
    #[error("not connected")]
    NotConnected,

    /// A room-scoped operation was attempted without a subscribed room.
    #[error("no active room session")]
    NoActiveRoom,

    /// A send was not acknowledged by the transport within the configured
    /// bound.
    #[error("send timed out after {} ms", .0.as_millis())]
    SendTimeout(Duration),

    /// The transport could not establish the physical connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The transport failed after the connection was established.
    #[error("transport error: {0}")]
    Transport(String),

    /// A broker frame could not be decoded.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A JSON payload could not be encoded or decoded.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// A string could not be parsed as a room address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A room session lifecycle call was made from a state that does not
    /// allow it.
    #[error("invalid session transition: {from} -> {to}")]
    InvalidTransition {
        /// State the session was in.
        from: &'static str,
        /// State the caller tried to reach.
        to: &'static str,
    },

    /// The REST collaborator returned an error or could not be reached.
    #[error("http error: {0}")]
    Http(String),

    /// Configuration value is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl RealtimeError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn code(&self) -> u32 {
        match self {
            Self::NotConnected => 1001,
            Self::NoActiveRoom => 1002,
            Self::InvalidTransition { .. } => 1003,
            Self::InvalidAddress(_) => 1004,
            Self::ConnectionFailed(_) => 2001,
            Self::Transport(_) => 2002,
            Self::SendTimeout(_) => 2003,
            Self::MalformedFrame(_) => 3001,
            Self::Payload(_) => 3002,
            Self::Http(_) => 4001,
            Self::Config(_) => 5001,
        }
    }

    /// Returns `true` when the caller may retry once the connection is
    /// re-established.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected
                | Self::SendTimeout(_)
                | Self::ConnectionFailed(_)
                | Self::Transport(_)
        )
    }
}

impl From<reqwest::Error> for RealtimeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
