//! Connection manager: owns the one physical link shared by every consumer.
//!
//! The manager is an explicitly constructed service. Clones share state, so
//! one instance is built at the composition root and handed to every room
//! session. It tracks the connected flag, notifies listeners on every
//! transition, multiplexes consumer subscriptions onto one transport
//! subscription per address, and replays every wanted address after each
//! successful (re)connect.
//!
//! ```text
//!   RoomSession ──subscribe──▶ SubscriptionRegistry (wanted addresses)
//!        │                              │ claim / bind
//!        ▼                              ▼
//!   ConnectionManager ──────────▶ Transport (stub | live)
//!        ▲                              │ link_state watch
//!        └────── supervisor task ◀──────┘ (reconnect + replay)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::reconnect::ReconnectPolicy;
use super::registry::{SubscriptionId, SubscriptionInfo, SubscriptionRegistry};
use crate::config::RealtimeConfig;
use crate::domain::{Address, ChatMessage, OutboundMessage, SendDestination};
use crate::error::RealtimeError;
use crate::transport::{ConnectOptions, MessageHandler, Transport};

/// Callback invoked with the new connected flag on every transition.
pub type ConnectionListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Handle for removing a connection listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

/// Manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Options passed to every transport connect, including reconnects.
    pub connect: ConnectOptions,
    /// Delay schedule after involuntary disconnects.
    pub reconnect: ReconnectPolicy,
    /// Bound on a single send.
    pub send_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect: ConnectOptions::default(),
            reconnect: ReconnectPolicy::default(),
            send_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&RealtimeConfig> for ManagerConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            connect: ConnectOptions {
                token: config.auth_token.clone(),
            },
            reconnect: config.reconnect,
            send_timeout: config.send_timeout,
        }
    }
}

#[derive(Default)]
struct ManagerState {
    connected: bool,
    consumers: usize,
    supervisor: Option<JoinHandle<()>>,
}

/// Counts one consumer until kept; dropping it unkept takes the count back.
struct ConsumerClaim<'a> {
    state: &'a Mutex<ManagerState>,
    kept: bool,
}

impl<'a> ConsumerClaim<'a> {
    fn new(state: &'a Mutex<ManagerState>) -> Self {
        state.lock().unwrap_or_else(PoisonError::into_inner).consumers += 1;
        Self { state, kept: false }
    }

    fn keep(mut self) {
        self.kept = true;
    }
}

impl Drop for ConsumerClaim<'_> {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.consumers = state.consumers.saturating_sub(1);
    }
}

struct ManagerInner<T> {
    transport: T,
    config: ManagerConfig,
    state: Mutex<ManagerState>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    listeners: Mutex<BTreeMap<ListenerId, ConnectionListener>>,
    next_listener: AtomicU64,
    /// Serializes physical connects and disconnects.
    gate: tokio::sync::Mutex<()>,
}

/// Shared owner of the physical connection.
pub struct ConnectionManager<T: Transport> {
    inner: Arc<ManagerInner<T>>,
}

impl<T: Transport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Transport + fmt::Debug> fmt::Debug for ConnectionManager<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("transport", &self.inner.transport)
            .field("connected", &self.is_connected())
            .field("consumers", &self.consumer_count())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ConnectionManager<T> {
    /// Creates a disconnected manager around `transport`.
    #[must_use]
    pub fn new(transport: T, config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                config,
                state: Mutex::new(ManagerState::default()),
                registry: Arc::new(Mutex::new(SubscriptionRegistry::new())),
                listeners: Mutex::new(BTreeMap::new()),
                next_listener: AtomicU64::new(1),
                gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// The underlying transport.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    /// Manager settings.
    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Opens the physical connection and replays wanted addresses.
    ///
    /// Idempotent: concurrent or repeated calls result in one physical
    /// connection.
    ///
    /// # Errors
    ///
    /// Propagates the transport's connect error.
    pub async fn connect(&self) -> Result<(), RealtimeError> {
        let _gate = self.inner.gate.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.inner
            .transport
            .connect(&self.inner.config.connect)
            .await?;
        self.inner.set_connected(true);
        self.inner.replay();
        self.spawn_supervisor();
        Ok(())
    }

    /// Closes the physical connection.
    ///
    /// Stops reconnecting, clears every active flag and notifies listeners.
    /// Consumer subscriptions stay recorded and are replayed by the next
    /// [`ConnectionManager::connect`].
    ///
    /// # Errors
    ///
    /// Propagates the transport's disconnect error; local state is torn
    /// down regardless.
    pub async fn disconnect(&self) -> Result<(), RealtimeError> {
        let _gate = self.inner.gate.lock().await;
        let supervisor = self.inner.lock_state().supervisor.take();
        if let Some(handle) = supervisor {
            handle.abort();
        }
        let result = self.inner.transport.disconnect().await;
        self.inner.lock_registry().deactivate_all();
        self.inner.set_connected(false);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "transport disconnect failed");
        }
        result
    }

    /// Registers a consumer and connects if this is the first one.
    ///
    /// The consumer only stays counted once the connect finishes; if the
    /// returned future is dropped first, the count is rolled back.
    ///
    /// # Errors
    ///
    /// Propagates the connect error; the consumer is not counted then.
    pub async fn acquire(&self) -> Result<(), RealtimeError> {
        let claim = ConsumerClaim::new(&self.inner.state);
        self.connect().await?;
        claim.keep();
        Ok(())
    }

    /// Unregisters a consumer and disconnects when it was the last one.
    ///
    /// # Errors
    ///
    /// Propagates the disconnect error of the last release.
    pub async fn release(&self) -> Result<(), RealtimeError> {
        let last = {
            let mut state = self.inner.lock_state();
            if state.consumers == 0 {
                return Ok(());
            }
            state.consumers -= 1;
            state.consumers == 0
        };
        if last {
            tracing::debug!("last consumer released the connection");
            self.disconnect().await?;
        }
        Ok(())
    }

    /// Number of consumers currently holding the connection.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.inner.lock_state().consumers
    }

    /// Returns `true` while the manager considers the link up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.lock_state().connected
    }

    /// Subscribes `handler` to `address`.
    ///
    /// Consumers of the same address share one transport subscription.
    /// While disconnected the address is recorded and subscribed on the
    /// next successful connect.
    pub fn subscribe(&self, address: Address, handler: MessageHandler) -> SubscriptionId {
        let (id, claimed) = {
            let mut registry = self.inner.lock_registry();
            let id = registry.register(address, handler);
            let claimed = self.is_connected() && registry.claim(address);
            (id, claimed)
        };
        if claimed {
            self.inner.attach(address);
        }
        tracing::debug!(%address, subscription = %id, "consumer subscribed");
        id
    }

    /// Removes a consumer subscription. Safe to call repeatedly and after a
    /// disconnect. Returns `false` for unknown or already removed ids.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removal = self.inner.lock_registry().remove(id);
        let Some(removal) = removal else {
            return false;
        };
        if let Some(token) = removal.release {
            self.inner.transport.unsubscribe(token);
        }
        tracing::debug!(address = %removal.address, subscription = %id, "consumer unsubscribed");
        true
    }

    /// Snapshot of every consumer subscription.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        self.inner.lock_registry().subscriptions()
    }

    /// Publishes `message`, bounded by the configured send timeout.
    ///
    /// # Errors
    ///
    /// - [`RealtimeError::NotConnected`] while disconnected.
    /// - [`RealtimeError::SendTimeout`] if the transport does not finish in
    ///   time.
    /// - Any transport send error.
    pub async fn send(
        &self,
        destination: SendDestination,
        message: &OutboundMessage,
    ) -> Result<(), RealtimeError> {
        if !self.is_connected() {
            return Err(RealtimeError::NotConnected);
        }
        let limit = self.inner.config.send_timeout;
        tokio::time::timeout(limit, self.inner.transport.send(destination, message))
            .await
            .map_err(|_| RealtimeError::SendTimeout(limit))?
    }

    /// Adds a listener called synchronously with the new state on every
    /// connected/disconnected transition.
    pub fn add_connection_listener(&self, listener: ConnectionListener) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::SeqCst));
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, listener);
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn remove_connection_listener(&self, id: ListenerId) -> bool {
        self.inner
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some()
    }

    fn spawn_supervisor(&self) {
        let mut state = self.inner.lock_state();
        if state
            .supervisor
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
        {
            return;
        }
        let link = self.inner.transport.link_state();
        state.supervisor = Some(tokio::spawn(supervise(Arc::downgrade(&self.inner), link)));
    }
}

impl<T: Transport> ManagerInner<T> {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, SubscriptionRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores the new flag and notifies listeners if it changed.
    fn set_connected(&self, connected: bool) {
        {
            let mut state = self.lock_state();
            if state.connected == connected {
                return;
            }
            state.connected = connected;
        }
        let listeners: Vec<ConnectionListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Arc::clone)
            .collect();
        tracing::info!(connected, listeners = listeners.len(), "connection state changed");
        for listener in listeners {
            listener(connected);
        }
    }

    /// Subscribes every unbound address on the transport.
    fn replay(&self) {
        let addresses = self.lock_registry().claim_unbound();
        if addresses.is_empty() {
            return;
        }
        tracing::info!(count = addresses.len(), "replaying subscriptions");
        for address in addresses {
            self.attach(address);
        }
    }

    /// Creates the transport subscription for a claimed address.
    fn attach(&self, address: Address) {
        let handler = fan_out(Arc::clone(&self.registry), address);
        match self.transport.subscribe(address, handler) {
            Ok(token) => {
                let bound = self.lock_registry().bind(address, token);
                if !bound {
                    self.transport.unsubscribe(token);
                }
            }
            Err(e) => {
                self.lock_registry().unclaim(address);
                tracing::warn!(%address, error = %e, "transport subscribe failed");
            }
        }
    }

    fn on_link_lost(&self) {
        self.lock_registry().deactivate_all();
        self.set_connected(false);
    }
}

/// Transport handler delivering to every consumer of `address`.
fn fan_out(registry: Arc<Mutex<SubscriptionRegistry>>, address: Address) -> MessageHandler {
    Arc::new(move |message: ChatMessage| {
        let handlers = registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers_for(&address);
        for (handler, active) in handlers {
            if active.load(Ordering::SeqCst) {
                handler(message.clone());
            }
        }
    })
}

/// Watches the link and reconnects after involuntary drops.
async fn supervise<T: Transport>(inner: Weak<ManagerInner<T>>, mut link: watch::Receiver<bool>) {
    loop {
        if link.wait_for(|up| !*up).await.is_err() {
            return;
        }
        {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            tracing::warn!("link lost, reconnecting");
            inner.on_link_lost();
        }
        if !reconnect(&inner).await {
            return;
        }
    }
}

/// Retries per the reconnect policy. Returns `false` once it gives up or
/// the manager is gone.
async fn reconnect<T: Transport>(weak: &Weak<ManagerInner<T>>) -> bool {
    let Some(policy) = weak.upgrade().map(|inner| inner.config.reconnect) else {
        return false;
    };
    let mut attempt: u32 = 0;
    loop {
        let Some(delay) = policy.delay_for(attempt) else {
            tracing::error!(attempts = attempt, "giving up reconnecting");
            return false;
        };
        tokio::time::sleep(delay).await;
        attempt = attempt.saturating_add(1);

        let Some(inner) = weak.upgrade() else {
            return false;
        };
        let _gate = inner.gate.lock().await;
        match inner.transport.connect(&inner.config.connect).await {
            Ok(()) => {
                tracing::info!(attempt, "reconnected");
                inner.set_connected(true);
                inner.replay();
                return true;
            }
            Err(e) => {
                tracing::warn!(
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %e,
                    "reconnect attempt failed"
                );
            }
        }
    }
}
