//! Transport layer: the contract every messaging backend satisfies.
//!
//! A [`Transport`] owns one physical link and exposes five operations
//! (connect, disconnect, subscribe, send, connection query) plus the
//! explicit-token unsubscribe and a link-state watch the connection
//! manager uses to notice involuntary drops.
//!
//! Two implementations exist and are interchangeable behind
//! [`AnyTransport`], selected at construction time:
//!
//! - [`StubTransport`]: in-process simulation with latency and scripted
//!   replies, for offline development and tests.
//! - [`LiveTransport`]: STOMP frames over a WebSocket to the real broker.

pub mod live;
pub mod stomp;
pub mod stub;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

pub use live::{LiveConfig, LiveTransport};
pub use stub::{StubConfig, StubTransport};

use crate::config::{RealtimeConfig, TransportKind};
use crate::domain::{Address, ChatMessage, OutboundMessage, SendDestination};
use crate::error::RealtimeError;

/// Callback invoked for every message delivered on a subscribed address.
pub type MessageHandler = Arc<dyn Fn(ChatMessage) + Send + Sync>;

/// Handle identifying one transport-level subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransportToken(u64);

impl TransportToken {
    /// Wraps a raw token value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransportToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Options passed to [`Transport::connect`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Bearer token presented during the handshake.
    pub token: Option<String>,
}

/// Contract every messaging backend satisfies.
///
/// Implementations must guarantee:
///
/// - [`Transport::unsubscribe`] stops all further deliveries to the
///   handler registered under that token before it returns.
/// - [`Transport::send`] on a disconnected transport fails with
///   [`RealtimeError::NotConnected`] instead of queueing.
/// - [`Transport::subscribe`] on a disconnected transport fails with
///   [`RealtimeError::NotConnected`].
/// - When the link goes down, every transport-level subscription is
///   forgotten and the [`Transport::link_state`] watch flips to `false`.
pub trait Transport: Send + Sync + 'static {
    /// Establishes the physical link. Calling it while connected is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::ConnectionFailed`] when the link cannot be
    /// established.
    fn connect(
        &self,
        options: &ConnectOptions,
    ) -> impl Future<Output = Result<(), RealtimeError>> + Send;

    /// Tears down the physical link and forgets all subscriptions.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the close handshake fails; the link is
    /// considered down either way.
    fn disconnect(&self) -> impl Future<Output = Result<(), RealtimeError>> + Send;

    /// Starts delivering messages on `address` to `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::NotConnected`] when the link is down.
    fn subscribe(
        &self,
        address: Address,
        handler: MessageHandler,
    ) -> Result<TransportToken, RealtimeError>;

    /// Stops deliveries for `token`. Returns `false` if the token was
    /// unknown (already removed, or dropped by a disconnect).
    fn unsubscribe(&self, token: TransportToken) -> bool;

    /// Publishes `message` to `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::NotConnected`] when the link is down, or a
    /// transport error if the frame could not be written.
    fn send(
        &self,
        destination: SendDestination,
        message: &OutboundMessage,
    ) -> impl Future<Output = Result<(), RealtimeError>> + Send;

    /// Returns `true` while the physical link is up.
    fn is_connected(&self) -> bool;

    /// Watch channel that follows the link state.
    fn link_state(&self) -> watch::Receiver<bool>;
}

/// Either transport, chosen at construction time.
#[derive(Debug, Clone)]
pub enum AnyTransport {
    /// In-process simulation.
    Stub(StubTransport),
    /// Networked broker client.
    Live(LiveTransport),
}

impl AnyTransport {
    /// Builds the transport named by `config.transport`.
    #[must_use]
    pub fn from_config(config: &RealtimeConfig) -> Self {
        match config.transport {
            TransportKind::Stub => Self::Stub(StubTransport::new(StubConfig::from(config))),
            TransportKind::Live => Self::Live(LiveTransport::new(LiveConfig::from(config))),
        }
    }

    /// Returns the stub transport, if that is the active variant.
    #[must_use]
    pub const fn as_stub(&self) -> Option<&StubTransport> {
        match self {
            Self::Stub(stub) => Some(stub),
            Self::Live(_) => None,
        }
    }
}

impl From<StubTransport> for AnyTransport {
    fn from(stub: StubTransport) -> Self {
        Self::Stub(stub)
    }
}

impl From<LiveTransport> for AnyTransport {
    fn from(live: LiveTransport) -> Self {
        Self::Live(live)
    }
}

impl Transport for AnyTransport {
    async fn connect(&self, options: &ConnectOptions) -> Result<(), RealtimeError> {
        match self {
            Self::Stub(t) => t.connect(options).await,
            Self::Live(t) => t.connect(options).await,
        }
    }

    async fn disconnect(&self) -> Result<(), RealtimeError> {
        match self {
            Self::Stub(t) => t.disconnect().await,
            Self::Live(t) => t.disconnect().await,
        }
    }

    fn subscribe(
        &self,
        address: Address,
        handler: MessageHandler,
    ) -> Result<TransportToken, RealtimeError> {
        match self {
            Self::Stub(t) => t.subscribe(address, handler),
            Self::Live(t) => t.subscribe(address, handler),
        }
    }

    fn unsubscribe(&self, token: TransportToken) -> bool {
        match self {
            Self::Stub(t) => t.unsubscribe(token),
            Self::Live(t) => t.unsubscribe(token),
        }
    }

    async fn send(
        &self,
        destination: SendDestination,
        message: &OutboundMessage,
    ) -> Result<(), RealtimeError> {
        match self {
            Self::Stub(t) => t.send(destination, message).await,
            Self::Live(t) => t.send(destination, message).await,
        }
    }

    fn is_connected(&self) -> bool {
        match self {
            Self::Stub(t) => t.is_connected(),
            Self::Live(t) => t.is_connected(),
        }
    }

    fn link_state(&self) -> watch::Receiver<bool> {
        match self {
            Self::Stub(t) => t.link_state(),
            Self::Live(t) => t.link_state(),
        }
    }
}
