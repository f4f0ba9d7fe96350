//! # Subscription Registry
//!
//! Owns subscriber identity and the per-type routing index.
//!
//! ## Layout
//!
//! - An arena of slots indexed by `id - 1`, plus a free-list of released IDs.
//! - `by_type`: for every concrete [`EventType`], the subscribers that receive
//!   it. Wildcard subscribers are materialised into every type.
//! - `workers`: the dispatch queue of every type that has been sent to,
//!   created lazily under the same lock as the index.
//!
//! A slot remembers the expanded types it was indexed under, so removal
//! touches exactly the indices insertion touched.

use std::collections::{BTreeMap, HashMap};

use event_types::{EventBatch, EventType};
use tokio::sync::mpsc;

use crate::delivery::OptionalDelivery;
use crate::subscriber::{SubscriberId, Subscription};

/// Dispatch queue slots per registered subscriber.
const QUEUE_SLOTS_PER_SUBSCRIBER: usize = 20;

/// A routable subscriber as held in the type index.
#[derive(Debug, Clone)]
pub(crate) struct Handle {
    pub(crate) id: SubscriberId,
    pub(crate) subscription: Subscription,
    /// Shared across every type the subscriber is indexed under.
    pub(crate) delivery: OptionalDelivery,
}

#[derive(Debug)]
struct Slot {
    handle: Handle,
    types: Vec<EventType>,
}

/// Subscriber arena, type index and dispatch queues.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    slots: Vec<Option<Slot>>,
    free: Vec<SubscriberId>,
    by_type: HashMap<EventType, BTreeMap<SubscriberId, Handle>>,
    workers: HashMap<EventType, mpsc::Sender<EventBatch>>,
    required: usize,
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and return its ID.
    pub fn subscribe(&mut self, subscription: Subscription) -> SubscriberId {
        let id = self.next_id();
        subscription.meta().set_id(id);

        let types = EventType::expand(&subscription.meta().types());
        if subscription.is_required() {
            self.required += 1;
        }
        let handle = Handle {
            id,
            subscription,
            delivery: OptionalDelivery::new(),
        };
        for ty in &types {
            self.by_type
                .entry(*ty)
                .or_default()
                .insert(id, handle.clone());
        }
        self.slots[id - 1] = Some(Slot { handle, types });
        id
    }

    /// Remove a subscriber. Returns `false` if the ID was not registered.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let Some(slot) = id
            .checked_sub(1)
            .and_then(|index| self.slots.get_mut(index))
            .and_then(Option::take)
        else {
            return false;
        };

        for ty in &slot.types {
            if let Some(index) = self.by_type.get_mut(ty) {
                index.remove(&id);
                if index.is_empty() {
                    self.by_type.remove(ty);
                }
            }
        }
        if slot.handle.subscription.is_required() {
            self.required -= 1;
        }
        self.free.push(id);
        true
    }

    /// Remove `id` only if it still refers to the same subscriber object.
    ///
    /// A dispatch pass may observe a closed subscriber whose ID has since been
    /// released and handed to someone else.
    pub(crate) fn unsubscribe_if_same(&mut self, id: SubscriberId, expected: &Subscription) -> bool {
        let same = self
            .slot(id)
            .is_some_and(|slot| slot.handle.subscription.same_subscriber(expected));
        same && self.unsubscribe(id)
    }

    /// Copy of the subscribers currently routed `event_type`, in ID order.
    pub(crate) fn snapshot(&self, event_type: EventType) -> Vec<Handle> {
        self.by_type
            .get(&event_type)
            .map(|index| index.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Dispatch queue for `event_type`, creating it with `spawn` on first use.
    ///
    /// `spawn` receives the queue capacity and returns the sending side of the
    /// worker it started.
    pub(crate) fn worker_for<F>(&mut self, event_type: EventType, spawn: F) -> mpsc::Sender<EventBatch>
    where
        F: FnOnce(usize) -> mpsc::Sender<EventBatch>,
    {
        if let Some(tx) = self.workers.get(&event_type) {
            if !tx.is_closed() {
                return tx.clone();
            }
        }
        let capacity = self.len().max(1) * QUEUE_SLOTS_PER_SUBSCRIBER + QUEUE_SLOTS_PER_SUBSCRIBER;
        let tx = spawn(capacity);
        self.workers.insert(event_type, tx.clone());
        tx
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of registered required subscribers.
    #[must_use]
    pub fn required_count(&self) -> usize {
        self.required
    }

    /// Number of subscribers routed `event_type`.
    #[must_use]
    pub fn count_for(&self, event_type: EventType) -> usize {
        self.by_type.get(&event_type).map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn contains(&self, id: SubscriberId) -> bool {
        self.slot(id).is_some()
    }

    fn slot(&self, id: SubscriberId) -> Option<&Slot> {
        id.checked_sub(1)
            .and_then(|index| self.slots.get(index))
            .and_then(Option::as_ref)
    }

    fn next_id(&mut self) -> SubscriberId {
        match self.free.pop() {
            Some(id) => id,
            None => {
                self.slots.push(None);
                self.slots.len()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::{ChannelSubscriber, SubscriberMeta};

    fn optional(types: Vec<EventType>) -> Subscription {
        let (sub, rx) = ChannelSubscriber::new(types, 1);
        std::mem::forget(rx);
        Subscription::optional(sub)
    }

    #[test]
    fn test_ids_start_at_one() {
        let mut registry = SubscriberRegistry::new();
        let sub = optional(vec![EventType::Trade]);
        let id = registry.subscribe(sub.clone());
        assert_eq!(id, 1);
        assert_eq!(sub.meta().id(), 1);
        assert_eq!(registry.subscribe(optional(vec![])), 2);
    }

    #[test]
    fn test_unsubscribe_recycles_id_once() {
        let mut registry = SubscriberRegistry::new();
        let first = registry.subscribe(optional(vec![EventType::Trade]));
        let second = registry.subscribe(optional(vec![EventType::Trade]));

        assert!(registry.unsubscribe(first));
        assert!(!registry.unsubscribe(first));
        assert_eq!(registry.len(), 1);

        let third = registry.subscribe(optional(vec![EventType::Order]));
        assert_eq!(third, first);
        assert_ne!(third, second);

        // The double unsubscribe must not have freed the ID twice.
        let fourth = registry.subscribe(optional(vec![]));
        assert_eq!(fourth, 3);
    }

    #[test]
    fn test_unknown_ids_are_noops() {
        let mut registry = SubscriberRegistry::new();
        assert!(!registry.unsubscribe(0));
        assert!(!registry.unsubscribe(42));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_wildcard_is_materialised_into_every_type() {
        let mut registry = SubscriberRegistry::new();
        let id = registry.subscribe(optional(vec![EventType::All]));
        for ty in EventType::CONCRETE {
            assert_eq!(registry.count_for(ty), 1, "missing from {ty}");
        }

        registry.unsubscribe(id);
        for ty in EventType::CONCRETE {
            assert_eq!(registry.count_for(ty), 0);
        }
    }

    #[test]
    fn test_typed_subscriber_only_in_its_indices() {
        let mut registry = SubscriberRegistry::new();
        registry.subscribe(optional(vec![EventType::Trade, EventType::Order]));

        assert_eq!(registry.count_for(EventType::Trade), 1);
        assert_eq!(registry.count_for(EventType::Order), 1);
        assert_eq!(registry.count_for(EventType::Party), 0);
        assert_eq!(registry.snapshot(EventType::Party).len(), 0);
    }

    #[test]
    fn test_unsubscribe_if_same_protects_reused_ids() {
        let mut registry = SubscriberRegistry::new();
        let old = optional(vec![EventType::Trade]);
        let id = registry.subscribe(old.clone());
        registry.unsubscribe(id);

        let new = optional(vec![EventType::Trade]);
        assert_eq!(registry.subscribe(new.clone()), id);

        assert!(!registry.unsubscribe_if_same(id, &old));
        assert!(registry.contains(id));
        assert!(registry.unsubscribe_if_same(id, &new));
    }

    #[test]
    fn test_worker_created_once_with_scaled_capacity() {
        let mut registry = SubscriberRegistry::new();
        registry.subscribe(optional(vec![]));
        registry.subscribe(optional(vec![]));

        let mut capacities = Vec::new();
        let (tx, _rx) = mpsc::channel(1);
        let _ = registry.worker_for(EventType::Trade, |cap| {
            capacities.push(cap);
            tx.clone()
        });
        let _ = registry.worker_for(EventType::Trade, |cap| {
            capacities.push(cap);
            tx.clone()
        });
        assert_eq!(capacities, vec![60]);
    }
}
