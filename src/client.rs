//! Composition root: wires configuration, transport, connection manager,
//! REST collaborator and entity cache together.
//!
//! One [`ChatClient`] is built at startup and cloned into whatever renders
//! chat rooms; every clone shares the same physical connection and cache.

use std::sync::Arc;

use crate::api::{ChatApi, RestChatApi};
use crate::cache::EntityCache;
use crate::config::RealtimeConfig;
use crate::connection::{ConnectionManager, ManagerConfig};
use crate::domain::UserId;
use crate::error::RealtimeError;
use crate::session::{RoomSession, RoomSpec};
use crate::transport::AnyTransport;

/// Shared messaging services.
#[derive(Debug, Clone)]
pub struct ChatClient {
    /// Settings the client was built from.
    pub config: Arc<RealtimeConfig>,
    /// Owner of the physical connection.
    pub manager: ConnectionManager<AnyTransport>,
    /// REST collaborator for history and room creation.
    pub api: RestChatApi,
    /// Team and user cache for sender resolution.
    pub cache: Arc<EntityCache>,
}

impl ChatClient {
    /// Builds the client with the transport selected by `config.transport`.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Http`] if the REST client cannot be built.
    pub fn from_config(config: RealtimeConfig) -> Result<Self, RealtimeError> {
        let transport = AnyTransport::from_config(&config);
        Self::with_transport(config, transport)
    }

    /// Builds the client around an explicit transport.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::Http`] if the REST client cannot be built.
    pub fn with_transport(
        config: RealtimeConfig,
        transport: AnyTransport,
    ) -> Result<Self, RealtimeError> {
        let api = RestChatApi::from_config(&config)?;
        let manager = ConnectionManager::new(transport, ManagerConfig::from(&config));
        let cache = Arc::new(EntityCache::from_config(&config));
        tracing::info!(
            transport = ?config.transport,
            socket = %config.socket_url(),
            "chat client ready"
        );
        Ok(Self {
            config: Arc::new(config),
            manager,
            api,
            cache,
        })
    }

    /// Creates an idle session for `spec`.
    #[must_use]
    pub fn room(&self, spec: RoomSpec) -> RoomSession<AnyTransport> {
        RoomSession::new(
            self.manager.clone(),
            spec,
            self.config.session_event_capacity,
        )
    }

    /// Opens a session for `spec` and loads its history. A history failure
    /// is logged and leaves the session open with live messages only.
    ///
    /// # Errors
    ///
    /// Propagates the open error.
    pub async fn join_room(
        &self,
        spec: RoomSpec,
    ) -> Result<RoomSession<AnyTransport>, RealtimeError> {
        let mut session = self.room(spec);
        session.open().await?;
        if let Err(e) = session.load_history(&self.api).await {
            tracing::warn!(room_id = %spec.room_id, error = %e, "history unavailable");
        }
        Ok(session)
    }

    /// Creates (or reuses) the private room between `me` and `other` and
    /// joins it.
    ///
    /// # Errors
    ///
    /// Propagates the room creation or open error.
    pub async fn join_private_room(
        &self,
        me: UserId,
        other: UserId,
    ) -> Result<RoomSession<AnyTransport>, RealtimeError> {
        let room_id = self.api.create_private_room(me, other).await?;
        self.join_room(RoomSpec::direct(room_id, me)).await
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use tokio_test::assert_ok;

    use super::*;
    use crate::domain::RoomId;
    use crate::session::SessionState;

    fn client() -> ChatClient {
        let config = RealtimeConfig {
            stub_latency: std::time::Duration::ZERO,
            stub_scripted_replies: false,
            ..RealtimeConfig::default()
        };
        let Ok(client) = ChatClient::from_config(config) else {
            panic!("default config builds");
        };
        client
    }

    #[tokio::test]
    async fn default_config_uses_the_stub() {
        let client = client();
        assert!(client.manager.transport().as_stub().is_some());
        assert!(!client.manager.is_connected());
    }

    #[tokio::test]
    async fn rooms_share_one_connection() {
        let client = client();
        let mut a = client.room(RoomSpec::group(RoomId::new(1), UserId::new(5)));
        let mut b = client.clone().room(RoomSpec::group(RoomId::new(2), UserId::new(5)));
        assert_ok!(a.open().await);
        assert_ok!(b.open().await);
        assert_eq!(a.state(), SessionState::Subscribed);

        let connects = client
            .manager
            .transport()
            .as_stub()
            .map(|stub| stub.connect_count())
            .unwrap_or_default();
        assert_eq!(connects, 1);

        // The stub greets each new subscriber.
        assert_eq!(a.message_count(), 1);
        assert_ok!(a.send("hello").await);
        assert_eq!(a.message_count(), 2);
        assert_eq!(b.message_count(), 1);
    }
}
