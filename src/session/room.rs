//! Per-room session over the shared connection.
//!
//! A [`RoomSession`] is what a chat screen holds while it is mounted. It
//! walks an explicit state machine:
//!
//! ```text
//! Idle ──open──▶ Connecting ──▶ Subscribed ──close──▶ Closed
//!   ▲                │
//!   └─ connect err ──┤
//!   └─ open dropped ─┘
//! ```
//!
//! `open` is a no-op outside `Idle`, so rapid repeated calls never create a
//! second subscription. Inbound messages are appended to a [`MessageLog`]
//! with dedup by id, and each newly appended message is announced on the
//! session's event bus.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::log::MessageLog;
use crate::api::ChatApi;
use crate::connection::{ConnectionManager, ListenerId, SubscriptionId};
use crate::domain::{
    ChatKind, ChatMessage, OutboundMessage, RoomId, SessionEvent, SessionEventBus, UserId,
};
use crate::error::RealtimeError;
use crate::transport::Transport;

/// Which room a session joins, as whom, and over which address families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSpec {
    /// Room to join.
    pub room_id: RoomId,
    /// Local user; author of every message sent through the session.
    pub sender_id: UserId,
    /// Address families to listen on.
    pub kind: ChatKind,
}

impl RoomSpec {
    /// Team (broadcast) room.
    #[must_use]
    pub const fn group(room_id: RoomId, sender_id: UserId) -> Self {
        Self {
            room_id,
            sender_id,
            kind: ChatKind::Group,
        }
    }

    /// Direct (point-to-point) room.
    #[must_use]
    pub const fn direct(room_id: RoomId, sender_id: UserId) -> Self {
        Self {
            room_id,
            sender_id,
            kind: ChatKind::Direct,
        }
    }
}

/// Lifecycle state of a [`RoomSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not yet opened.
    Idle,
    /// Acquiring the shared connection.
    Connecting,
    /// Receiving messages.
    Subscribed,
    /// Closed for good.
    Closed,
}

impl SessionState {
    /// Lower-case state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State reachable from transport callbacks.
struct Inbox {
    room_id: RoomId,
    log: Mutex<MessageLog>,
    events: SessionEventBus,
}

impl Inbox {
    fn receive(&self, message: ChatMessage) {
        let appended = self
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        if appended {
            self.events.publish(SessionEvent::MessageReceived {
                room_id: self.room_id,
                message,
            });
        } else {
            tracing::debug!(room_id = %self.room_id, id = %message.id, "duplicate message ignored");
        }
    }
}

/// One consumer's view of one chat room.
pub struct RoomSession<T: Transport> {
    spec: RoomSpec,
    manager: ConnectionManager<T>,
    inbox: Arc<Inbox>,
    state: SessionState,
    subscriptions: Vec<SubscriptionId>,
    listener: Option<ListenerId>,
    acquired: bool,
}

impl<T: Transport> fmt::Debug for RoomSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomSession")
            .field("spec", &self.spec)
            .field("state", &self.state)
            .field("subscriptions", &self.subscriptions)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> RoomSession<T> {
    /// Creates an idle session. `event_capacity` bounds the event channel.
    #[must_use]
    pub fn new(manager: ConnectionManager<T>, spec: RoomSpec, event_capacity: usize) -> Self {
        Self {
            spec,
            manager,
            inbox: Arc::new(Inbox {
                room_id: spec.room_id,
                log: Mutex::new(MessageLog::new()),
                events: SessionEventBus::new(event_capacity),
            }),
            state: SessionState::Idle,
            subscriptions: Vec::new(),
            listener: None,
            acquired: false,
        }
    }

    /// Room, user and kind of this session.
    #[must_use]
    pub const fn spec(&self) -> &RoomSpec {
        &self.spec
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Receiver for this session's events.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inbox.events.subscribe()
    }

    /// Snapshot of the room's messages in order.
    #[must_use]
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inbox
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .messages()
            .to_vec()
    }

    /// Number of messages in the room's list.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.inbox
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Connects if needed and subscribes to the room. Calling it again
    /// while connecting or subscribed does nothing.
    ///
    /// # Errors
    ///
    /// - [`RealtimeError::InvalidTransition`] after [`RoomSession::close`].
    /// - The connect error; the session returns to `Idle` and may be
    ///   opened again.
    pub async fn open(&mut self) -> Result<(), RealtimeError> {
        match self.state {
            SessionState::Connecting | SessionState::Subscribed => return Ok(()),
            SessionState::Closed => {
                return Err(RealtimeError::InvalidTransition {
                    from: SessionState::Closed.as_str(),
                    to: SessionState::Connecting.as_str(),
                });
            }
            SessionState::Idle => {}
        }
        self.state = SessionState::Connecting;

        let inbox = Arc::clone(&self.inbox);
        self.listener = Some(self.manager.add_connection_listener(Arc::new(
            move |connected| {
                inbox.events.publish(SessionEvent::ConnectionChanged {
                    room_id: inbox.room_id,
                    connected,
                });
            },
        )));

        let mut attempt = OpenAttempt {
            session: &mut *self,
            committed: false,
        };
        if let Err(e) = attempt.session.manager.acquire().await {
            tracing::warn!(room_id = %attempt.session.spec.room_id, error = %e, "room open failed");
            return Err(e);
        }
        attempt.committed = true;
        drop(attempt);
        self.acquired = true;

        for address in self.spec.kind.addresses(self.spec.room_id) {
            let inbox = Arc::clone(&self.inbox);
            let id = self
                .manager
                .subscribe(address, Arc::new(move |message| inbox.receive(message)));
            self.subscriptions.push(id);
        }
        self.state = SessionState::Subscribed;
        tracing::info!(
            room_id = %self.spec.room_id,
            kind = ?self.spec.kind,
            "room session subscribed"
        );
        Ok(())
    }

    /// Sends `content` to the room as the session's user.
    ///
    /// # Errors
    ///
    /// - [`RealtimeError::NoActiveRoom`] unless the session is subscribed.
    /// - [`RealtimeError::NotConnected`] while the shared link is down.
    /// - [`RealtimeError::SendTimeout`] or a transport error from the send.
    pub async fn send(&self, content: impl Into<String>) -> Result<(), RealtimeError> {
        if self.state != SessionState::Subscribed {
            return Err(RealtimeError::NoActiveRoom);
        }
        if !self.manager.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        let message = OutboundMessage::chat(self.spec.room_id, self.spec.sender_id, content);
        self.manager
            .send(self.spec.kind.send_destination(), &message)
            .await
    }

    /// Fetches stored messages and places them ahead of live ones, skipping
    /// ids already present. Returns the number of messages added.
    ///
    /// # Errors
    ///
    /// Propagates the collaborator's error; the list is left unchanged.
    pub async fn load_history<A: ChatApi>(&self, api: &A) -> Result<usize, RealtimeError> {
        let history = api.fetch_history(self.spec.room_id).await?;
        let added = self
            .inbox
            .log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .merge_history(history);
        tracing::debug!(room_id = %self.spec.room_id, added, "history merged");
        Ok(added)
    }

    /// Unsubscribes and releases the shared connection, disconnecting it if
    /// this was the last consumer. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates the disconnect error of the last release; the session is
    /// closed regardless.
    pub async fn close(&mut self) -> Result<(), RealtimeError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.detach();
        self.state = SessionState::Closed;
        let result = if std::mem::take(&mut self.acquired) {
            self.manager.release().await
        } else {
            Ok(())
        };
        self.inbox.events.publish(SessionEvent::Closed {
            room_id: self.spec.room_id,
        });
        tracing::info!(room_id = %self.spec.room_id, "room session closed");
        result
    }

    fn detach(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.manager.unsubscribe(id);
        }
        if let Some(id) = self.listener.take() {
            self.manager.remove_connection_listener(id);
        }
    }
}

/// An `open` in flight. Unless committed, dropping it (on error or when
/// the `open` future is abandoned) detaches the listener and returns the
/// session to `Idle`.
struct OpenAttempt<'a, T: Transport> {
    session: &'a mut RoomSession<T>,
    committed: bool,
}

impl<T: Transport> Drop for OpenAttempt<'_, T> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Some(id) = self.session.listener.take() {
            self.session.manager.remove_connection_listener(id);
        }
        self.session.state = SessionState::Idle;
    }
}

impl<T: Transport> Drop for RoomSession<T> {
    fn drop(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.detach();
        if std::mem::take(&mut self.acquired)
            && let Ok(handle) = tokio::runtime::Handle::try_current()
        {
            let manager = self.manager.clone();
            handle.spawn(async move {
                if let Err(e) = manager.release().await {
                    tracing::warn!(error = %e, "release on drop failed");
                }
            });
        }
    }
}
