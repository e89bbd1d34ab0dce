//! In-process transport simulating a broker.
//!
//! [`StubTransport`] behaves like a single-client broker: every `send` is
//! echoed back, after a simulated latency, to the address matching the
//! send destination with a freshly generated id and timestamp. A scripted
//! bot can answer each message and greet new subscribers. Test hooks let
//! callers inject messages, drop the link and make connects fail.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use super::{ConnectOptions, MessageHandler, Transport, TransportToken};
use crate::config::RealtimeConfig;
use crate::domain::{Address, ChatMessage, OutboundMessage, SendDestination, UserId};
use crate::error::RealtimeError;

/// Behaviour knobs for [`StubTransport`].
#[derive(Debug, Clone)]
pub struct StubConfig {
    /// Delay before echoes, replies and greetings are delivered. Zero
    /// delivers synchronously inside the triggering call.
    pub latency: Duration,
    /// Time a connect takes before the link comes up.
    pub connect_delay: Duration,
    /// Whether each sent message gets a bot reply.
    pub scripted_replies: bool,
    /// Text delivered to each new subscriber, if any.
    pub greeting: Option<String>,
    /// Sender id used for bot messages.
    pub bot_id: UserId,
}

impl Default for StubConfig {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            connect_delay: Duration::ZERO,
            scripted_replies: false,
            greeting: None,
            bot_id: UserId::new(0),
        }
    }
}

impl From<&RealtimeConfig> for StubConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            latency: config.stub_latency,
            connect_delay: Duration::ZERO,
            scripted_replies: config.stub_scripted_replies,
            greeting: Some("Connected to the offline chat simulator.".to_string()),
            bot_id: UserId::new(0),
        }
    }
}

struct StubSubscription {
    address: Address,
    handler: MessageHandler,
    active: Arc<AtomicBool>,
}

struct StubInner {
    config: StubConfig,
    link: watch::Sender<bool>,
    subs: Mutex<HashMap<TransportToken, StubSubscription>>,
    next_token: AtomicU64,
    connects: AtomicUsize,
    failures_remaining: AtomicU32,
}

/// Offline transport; cheap to clone, clones share state.
#[derive(Clone)]
pub struct StubTransport {
    inner: Arc<StubInner>,
}

impl std::fmt::Debug for StubTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StubTransport")
            .field("connected", &self.is_connected())
            .field("connects", &self.connect_count())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl StubTransport {
    /// Creates a disconnected stub.
    #[must_use]
    pub fn new(config: StubConfig) -> Self {
        let (link, _) = watch::channel(false);
        Self {
            inner: Arc::new(StubInner {
                config,
                link,
                subs: Mutex::new(HashMap::new()),
                next_token: AtomicU64::new(1),
                connects: AtomicUsize::new(0),
                failures_remaining: AtomicU32::new(0),
            }),
        }
    }

    /// Number of physical connections established so far.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Number of live subscriptions on `address`.
    #[must_use]
    pub fn subscriber_count(&self, address: Address) -> usize {
        self.inner
            .subs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.address == address)
            .count()
    }

    /// Makes the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.inner.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Simulates an involuntary link loss: subscriptions are forgotten and
    /// the link watch flips to `false`.
    pub fn drop_link(&self) {
        tracing::info!("stub link dropped");
        self.inner.go_down();
    }

    /// Delivers `message` to every subscriber of `address` as if the broker
    /// had published it. Returns the number of handlers invoked.
    pub fn publish(&self, address: Address, message: ChatMessage) -> usize {
        self.inner.deliver(address, message)
    }
}

impl StubInner {
    fn go_down(&self) {
        self.subs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .for_each(|(_, sub)| sub.active.store(false, Ordering::SeqCst));
        self.link.send_replace(false);
    }

    fn deliver(&self, address: Address, message: ChatMessage) -> usize {
        let targets: Vec<(MessageHandler, Arc<AtomicBool>)> = self
            .subs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.address == address)
            .map(|s| (Arc::clone(&s.handler), Arc::clone(&s.active)))
            .collect();
        let mut delivered = 0;
        for (handler, active) in targets {
            if active.load(Ordering::SeqCst) {
                handler(message.clone());
                delivered += 1;
            }
        }
        delivered
    }

    /// Delivers `messages` in order, now when latency is zero, otherwise
    /// after the latency on one background task (skipped if the link went
    /// down in between).
    fn deliver_later(self: &Arc<Self>, address: Address, messages: Vec<ChatMessage>) {
        if self.config.latency.is_zero() {
            for message in messages {
                self.deliver(address, message);
            }
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(inner.config.latency).await;
            for message in messages {
                if !*inner.link.borrow() {
                    break;
                }
                inner.deliver(address, message);
            }
        });
    }
}

impl Transport for StubTransport {
    async fn connect(&self, _options: &ConnectOptions) -> Result<(), RealtimeError> {
        if self.is_connected() {
            return Ok(());
        }
        if !self.inner.config.connect_delay.is_zero() {
            tokio::time::sleep(self.inner.config.connect_delay).await;
        }
        let failing = self
            .inner
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RealtimeError::ConnectionFailed(
                "stub connect failure".to_string(),
            ));
        }
        self.inner.connects.fetch_add(1, Ordering::SeqCst);
        self.inner.link.send_replace(true);
        tracing::debug!("stub transport connected");
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), RealtimeError> {
        self.inner.go_down();
        tracing::debug!("stub transport disconnected");
        Ok(())
    }

    fn subscribe(
        &self,
        address: Address,
        handler: MessageHandler,
    ) -> Result<TransportToken, RealtimeError> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        let token = TransportToken::new(self.inner.next_token.fetch_add(1, Ordering::SeqCst));
        self.inner
            .subs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                token,
                StubSubscription {
                    address,
                    handler,
                    active: Arc::new(AtomicBool::new(true)),
                },
            );
        tracing::debug!(%address, %token, "stub subscribed");

        if let Some(greeting) = &self.inner.config.greeting {
            let hello = ChatMessage::new(address.room_id(), self.inner.config.bot_id, greeting);
            self.inner.deliver_later(address, vec![hello]);
        }
        Ok(token)
    }

    fn unsubscribe(&self, token: TransportToken) -> bool {
        let removed = self
            .inner
            .subs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&token);
        match removed {
            Some(sub) => {
                sub.active.store(false, Ordering::SeqCst);
                tracing::debug!(address = %sub.address, %token, "stub unsubscribed");
                true
            }
            None => false,
        }
    }

    async fn send(
        &self,
        destination: SendDestination,
        message: &OutboundMessage,
    ) -> Result<(), RealtimeError> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        let address = destination.delivery_address(message.room_id);
        let mut batch = vec![ChatMessage::new(
            message.room_id,
            message.sender_id,
            message.content.clone(),
        )];
        if self.inner.config.scripted_replies {
            batch.push(ChatMessage::new(
                message.room_id,
                self.inner.config.bot_id,
                format!("received: {:?}", message.content),
            ));
        }
        self.inner.deliver_later(address, batch);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.inner.link.borrow()
    }

    fn link_state(&self) -> watch::Receiver<bool> {
        self.inner.link.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::domain::RoomId;

    fn collector() -> (MessageHandler, Arc<StdMutex<Vec<ChatMessage>>>) {
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: MessageHandler = Arc::new(move |m| {
            sink.lock().unwrap_or_else(PoisonError::into_inner).push(m);
        });
        (handler, seen)
    }

    fn count(seen: &Arc<StdMutex<Vec<ChatMessage>>>) -> usize {
        seen.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let stub = StubTransport::new(StubConfig::default());
        let msg = OutboundMessage::chat(RoomId::new(1), UserId::new(1), "x");
        let err = assert_err!(stub.send(SendDestination::Group, &msg).await);
        assert!(matches!(err, RealtimeError::NotConnected));
        assert!(stub.subscribe(Address::Broadcast(RoomId::new(1)), collector().0).is_err());
    }

    #[tokio::test]
    async fn echo_reaches_matching_address_only() {
        let stub = StubTransport::new(StubConfig::default());
        assert_ok!(stub.connect(&ConnectOptions::default()).await);

        let room = RoomId::new(101);
        let (group_handler, group_seen) = collector();
        let (direct_handler, direct_seen) = collector();
        assert_ok!(stub.subscribe(Address::Broadcast(room), group_handler));
        assert_ok!(stub.subscribe(Address::Direct(room), direct_handler));

        let msg = OutboundMessage::chat(room, UserId::new(5), "hi");
        assert_ok!(stub.send(SendDestination::Group, &msg).await);

        assert_eq!(count(&group_seen), 1);
        assert_eq!(count(&direct_seen), 0);
        let seen = group_seen.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(echo) = seen.first() else {
            panic!("echo expected");
        };
        assert_eq!(echo.content, "hi");
        assert_eq!(echo.sender_id, UserId::new(5));
    }

    #[tokio::test]
    async fn scripted_reply_follows_echo() {
        let stub = StubTransport::new(StubConfig {
            scripted_replies: true,
            bot_id: UserId::new(99),
            ..StubConfig::default()
        });
        assert_ok!(stub.connect(&ConnectOptions::default()).await);
        let room = RoomId::new(2);
        let (handler, seen) = collector();
        assert_ok!(stub.subscribe(Address::Direct(room), handler));

        let msg = OutboundMessage::chat(room, UserId::new(5), "ping");
        assert_ok!(stub.send(SendDestination::Direct, &msg).await);

        let seen = seen.lock().unwrap_or_else(PoisonError::into_inner);
        assert_eq!(seen.len(), 2);
        let Some(reply) = seen.get(1) else {
            panic!("reply expected");
        };
        assert_eq!(reply.sender_id, UserId::new(99));
        assert_eq!(reply.content, "received: \"ping\"");
    }

    #[tokio::test(start_paused = true)]
    async fn latency_delays_delivery() {
        let stub = StubTransport::new(StubConfig {
            latency: Duration::from_millis(350),
            ..StubConfig::default()
        });
        assert_ok!(stub.connect(&ConnectOptions::default()).await);
        let room = RoomId::new(3);
        let (handler, seen) = collector();
        assert_ok!(stub.subscribe(Address::Broadcast(room), handler));
        let msg = OutboundMessage::chat(room, UserId::new(1), "later");
        assert_ok!(stub.send(SendDestination::Group, &msg).await);

        assert_eq!(count(&seen), 0);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(count(&seen), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_reply_keeps_order_behind_echo() {
        let stub = StubTransport::new(StubConfig {
            latency: Duration::from_millis(350),
            scripted_replies: true,
            bot_id: UserId::new(99),
            ..StubConfig::default()
        });
        assert_ok!(stub.connect(&ConnectOptions::default()).await);
        let room = RoomId::new(6);
        let (handler, seen) = collector();
        assert_ok!(stub.subscribe(Address::Broadcast(room), handler));

        for text in ["one", "two", "three"] {
            let msg = OutboundMessage::chat(room, UserId::new(5), text);
            assert_ok!(stub.send(SendDestination::Group, &msg).await);
        }
        tokio::time::sleep(Duration::from_millis(400)).await;

        let senders: Vec<_> = seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|m| m.sender_id)
            .collect();
        let expected: Vec<_> = [5, 99, 5, 99, 5, 99].into_iter().map(UserId::new).collect();
        assert_eq!(senders, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_delay_holds_the_link_down() {
        let stub = StubTransport::new(StubConfig {
            connect_delay: Duration::from_secs(1),
            ..StubConfig::default()
        });
        let early = tokio::time::timeout(
            Duration::from_millis(100),
            stub.connect(&ConnectOptions::default()),
        )
        .await;
        assert!(early.is_err());
        assert!(!stub.is_connected());
        assert_eq!(stub.connect_count(), 0);

        assert_ok!(stub.connect(&ConnectOptions::default()).await);
        assert!(stub.is_connected());
    }

    #[tokio::test]
    async fn greeting_is_sent_on_subscribe() {
        let stub = StubTransport::new(StubConfig {
            greeting: Some("hello".to_string()),
            ..StubConfig::default()
        });
        assert_ok!(stub.connect(&ConnectOptions::default()).await);
        let (handler, seen) = collector();
        assert_ok!(stub.subscribe(Address::Broadcast(RoomId::new(8)), handler));
        assert_eq!(count(&seen), 1);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery_and_is_idempotent() {
        let stub = StubTransport::new(StubConfig::default());
        assert_ok!(stub.connect(&ConnectOptions::default()).await);
        let addr = Address::Broadcast(RoomId::new(4));
        let (handler, seen) = collector();
        let token = assert_ok!(stub.subscribe(addr, handler));

        assert!(stub.unsubscribe(token));
        assert!(!stub.unsubscribe(token));
        let delivered = stub.publish(addr, ChatMessage::new(RoomId::new(4), UserId::new(1), "x"));
        assert_eq!(delivered, 0);
        assert_eq!(count(&seen), 0);
    }

    #[tokio::test]
    async fn drop_link_forgets_subscriptions() {
        let stub = StubTransport::new(StubConfig::default());
        assert_ok!(stub.connect(&ConnectOptions::default()).await);
        let mut link = stub.link_state();
        let addr = Address::Direct(RoomId::new(5));
        let token = assert_ok!(stub.subscribe(addr, collector().0));

        stub.drop_link();
        assert!(!stub.is_connected());
        assert!(!*link.borrow_and_update());
        assert_eq!(stub.subscriber_count(addr), 0);
        assert!(!stub.unsubscribe(token));
    }

    #[tokio::test]
    async fn connect_is_idempotent_and_failures_are_scripted() {
        let stub = StubTransport::new(StubConfig::default());
        stub.fail_next_connects(1);
        assert_err!(stub.connect(&ConnectOptions::default()).await);
        assert_ok!(stub.connect(&ConnectOptions::default()).await);
        assert_ok!(stub.connect(&ConnectOptions::default()).await);
        assert_eq!(stub.connect_count(), 1);
    }
}
