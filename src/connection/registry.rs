//! Subscription registry.
//!
//! Records which addresses are wanted and by whom. Every address holds a
//! set of consumer handlers and at most one transport-level subscription,
//! so many consumers of the same room share one broker subscription.
//!
//! The registry never talks to the transport itself. It tells the
//! connection manager what to do: [`SubscriptionRegistry::claim`] and
//! [`SubscriptionRegistry::claim_unbound`] hand out addresses that need a
//! transport subscription, and [`SubscriptionRegistry::remove`] returns the
//! transport token to release once an address is no longer wanted.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::Address;
use crate::transport::{MessageHandler, TransportToken};

/// Consumer-facing subscription handle returned by the connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription-{}", self.0)
    }
}

/// Snapshot of one consumer subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionInfo {
    /// Consumer handle.
    pub id: SubscriptionId,
    /// Subscribed address.
    pub address: Address,
    /// `true` while a transport subscription currently delivers to it.
    pub active: bool,
}

/// Outcome of [`SubscriptionRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Removal {
    /// Address the removed subscription was registered on.
    pub address: Address,
    /// Transport subscription to release, set when the last consumer of
    /// the address left while it was bound.
    pub release: Option<TransportToken>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    /// No transport subscription; replay on the next (re)connect.
    Unbound,
    /// A transport subscribe is in flight.
    Claimed,
    /// Delivering through this transport subscription.
    Bound(TransportToken),
}

struct Consumer {
    handler: MessageHandler,
    active: Arc<AtomicBool>,
}

struct Slot {
    consumers: BTreeMap<SubscriptionId, Consumer>,
    binding: Binding,
}

/// Wanted addresses, their consumer handlers and transport bindings.
#[derive(Default)]
pub struct SubscriptionRegistry {
    slots: BTreeMap<Address, Slot>,
    index: HashMap<SubscriptionId, Address>,
    next_id: u64,
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("addresses", &self.slots.len())
            .field("subscriptions", &self.index.len())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `handler` as a consumer of `address`.
    pub fn register(&mut self, address: Address, handler: MessageHandler) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let slot = self.slots.entry(address).or_insert_with(|| Slot {
            consumers: BTreeMap::new(),
            binding: Binding::Unbound,
        });
        slot.consumers.insert(
            id,
            Consumer {
                handler,
                active: Arc::new(AtomicBool::new(true)),
            },
        );
        self.index.insert(id, address);
        id
    }

    /// Marks `address` as having a transport subscribe in flight. Returns
    /// `false` if it is already claimed, bound, or no longer wanted.
    pub fn claim(&mut self, address: Address) -> bool {
        match self.slots.get_mut(&address) {
            Some(slot) if slot.binding == Binding::Unbound => {
                slot.binding = Binding::Claimed;
                true
            }
            _ => false,
        }
    }

    /// Claims every unbound address. Used to replay after a reconnect.
    pub fn claim_unbound(&mut self) -> Vec<Address> {
        self.slots
            .iter_mut()
            .filter(|(_, slot)| slot.binding == Binding::Unbound)
            .map(|(address, slot)| {
                slot.binding = Binding::Claimed;
                *address
            })
            .collect()
    }

    /// Returns a claimed address to the unbound state after a failed
    /// transport subscribe.
    pub fn unclaim(&mut self, address: Address) {
        if let Some(slot) = self.slots.get_mut(&address)
            && slot.binding == Binding::Claimed
        {
            slot.binding = Binding::Unbound;
        }
    }

    /// Completes a claim. Returns `false` if the address stopped being
    /// wanted in the meantime; the caller must then release `token`.
    pub fn bind(&mut self, address: Address, token: TransportToken) -> bool {
        match self.slots.get_mut(&address) {
            Some(slot) if slot.binding == Binding::Claimed => {
                slot.binding = Binding::Bound(token);
                true
            }
            _ => false,
        }
    }

    /// Removes one consumer. Unknown or already removed ids return `None`.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Removal> {
        let address = self.index.remove(&id)?;
        let slot = self.slots.get_mut(&address)?;
        if let Some(consumer) = slot.consumers.remove(&id) {
            consumer.active.store(false, Ordering::SeqCst);
        }
        if !slot.consumers.is_empty() {
            return Some(Removal {
                address,
                release: None,
            });
        }
        let release = match slot.binding {
            Binding::Bound(token) => Some(token),
            Binding::Unbound | Binding::Claimed => None,
        };
        self.slots.remove(&address);
        Some(Removal { address, release })
    }

    /// Forgets every transport binding. Addresses stay wanted.
    pub fn deactivate_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.binding = Binding::Unbound;
        }
    }

    /// Handlers currently registered on `address`, paired with their
    /// liveness flags.
    pub(crate) fn handlers_for(&self, address: &Address) -> Vec<(MessageHandler, Arc<AtomicBool>)> {
        self.slots
            .get(address)
            .map(|slot| {
                slot.consumers
                    .values()
                    .map(|c| (Arc::clone(&c.handler), Arc::clone(&c.active)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshot of every consumer subscription, ordered by id.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let mut out: Vec<SubscriptionInfo> = self
            .slots
            .iter()
            .flat_map(|(address, slot)| {
                let active = matches!(slot.binding, Binding::Bound(_));
                slot.consumers.keys().map(move |id| SubscriptionInfo {
                    id: *id,
                    address: *address,
                    active,
                })
            })
            .collect();
        out.sort_by_key(|info| info.id);
        out
    }

    /// Addresses with at least one consumer.
    #[must_use]
    pub fn wanted_addresses(&self) -> Vec<Address> {
        self.slots.keys().copied().collect()
    }

    /// Returns `true` if `address` is bound to a transport subscription.
    #[must_use]
    pub fn is_bound(&self, address: &Address) -> bool {
        self.slots
            .get(address)
            .is_some_and(|slot| matches!(slot.binding, Binding::Bound(_)))
    }

    /// Number of consumer subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Returns `true` if nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::RoomId;

    fn noop() -> MessageHandler {
        Arc::new(|_| {})
    }

    fn room(id: i64) -> Address {
        Address::Broadcast(RoomId::new(id))
    }

    #[test]
    fn first_consumer_needs_transport_subscription() {
        let mut reg = SubscriptionRegistry::new();
        reg.register(room(1), noop());
        assert!(reg.claim(room(1)));
        reg.register(room(1), noop());
        assert!(!reg.claim(room(1)), "second consumer shares the claim");
        assert!(reg.bind(room(1), TransportToken::new(7)));
        assert!(reg.is_bound(&room(1)));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.wanted_addresses(), vec![room(1)]);
    }

    #[test]
    fn remove_is_idempotent_and_releases_last_binding() {
        let mut reg = SubscriptionRegistry::new();
        let a = reg.register(room(1), noop());
        let b = reg.register(room(1), noop());
        assert!(reg.claim(room(1)));
        assert!(reg.bind(room(1), TransportToken::new(3)));

        let Some(first) = reg.remove(a) else {
            panic!("known id");
        };
        assert_eq!(first.release, None);
        assert!(reg.remove(a).is_none());

        let Some(last) = reg.remove(b) else {
            panic!("known id");
        };
        assert_eq!(last.release, Some(TransportToken::new(3)));
        assert!(reg.is_empty());
        assert!(reg.wanted_addresses().is_empty());
    }

    #[test]
    fn bind_after_removal_is_refused() {
        let mut reg = SubscriptionRegistry::new();
        let id = reg.register(room(2), noop());
        assert!(reg.claim(room(2)));
        assert!(reg.remove(id).is_some());
        assert!(!reg.bind(room(2), TransportToken::new(1)));
    }

    #[test]
    fn deactivate_all_keeps_addresses_wanted() {
        let mut reg = SubscriptionRegistry::new();
        reg.register(room(1), noop());
        reg.register(Address::Direct(RoomId::new(1)), noop());
        for address in reg.claim_unbound() {
            assert!(reg.bind(address, TransportToken::new(1)));
        }
        assert!(reg.subscriptions().iter().all(|s| s.active));

        reg.deactivate_all();
        assert!(reg.subscriptions().iter().all(|s| !s.active));
        assert_eq!(reg.claim_unbound().len(), 2);
        assert!(reg.claim_unbound().is_empty(), "already claimed");
    }

    #[test]
    fn unclaim_allows_retry() {
        let mut reg = SubscriptionRegistry::new();
        reg.register(room(5), noop());
        assert!(reg.claim(room(5)));
        reg.unclaim(room(5));
        assert!(reg.claim(room(5)));
    }

    #[test]
    fn removed_handler_is_marked_inactive() {
        let mut reg = SubscriptionRegistry::new();
        let id = reg.register(room(1), noop());
        let handlers = reg.handlers_for(&room(1));
        assert_eq!(handlers.len(), 1);
        let Some((_, active)) = handlers.first() else {
            panic!("one handler");
        };
        assert!(active.load(Ordering::SeqCst));
        reg.remove(id);
        assert!(!active.load(Ordering::SeqCst));
        assert!(reg.handlers_for(&room(1)).is_empty());
    }

    #[test]
    fn subscriptions_are_listed_in_id_order() {
        let mut reg = SubscriptionRegistry::new();
        let a = reg.register(room(9), noop());
        let b = reg.register(room(1), noop());
        let ids: Vec<_> = reg.subscriptions().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a, b]);
        assert_eq!(a.to_string(), "subscription-1");
    }
}
