//! Subscription registry
//!
//! Per-tenant bookkeeping for subscriptions and their in-flight broker
//! acknowledgments. The registry is owned exclusively by the tenant's
//! runner task; every mutation happens on that one logical thread of
//! control, so no internal locking is needed.
//!
//! Acknowledgment correlation is FIFO per connection: the client library
//! assigns packet ids inside its event loop, so the oldest pending
//! subscribe (or unsubscribe) request is matched to the next SUBACK
//! (UNSUBACK) that arrives, and the ack's packet id becomes the
//! subscription's token. Pending queues are cleared on reconnect since
//! acknowledgments from a dead connection never arrive.

use std::collections::{HashMap, VecDeque};

use crate::error::BridgeError;
use crate::tenant::Subscription;

/// Registry of one tenant's subscriptions keyed by subscription id.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    /// Subscriptions by tenant-scoped id. Insert replaces.
    subs: HashMap<i64, Subscription>,
    /// Subscription ids with a subscribe request in flight, oldest first.
    pending_subscribes: VecDeque<i64>,
    /// Unsubscribe requests in flight, oldest first: (id, topic).
    pending_unsubscribes: VecDeque<(i64, String)>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subs.len()
    }

    /// True if no subscriptions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subs.is_empty()
    }

    /// Returns the subscription with the given id, if registered.
    #[must_use]
    pub fn get(&self, id: i64) -> Option<&Subscription> {
        self.subs.get(&id)
    }

    /// Inserts a subscription whose subscribe request has just been issued.
    ///
    /// The entry is stored pending (`ack = None`, `active = false`) and its
    /// id is queued for SUBACK resolution. Inserting an id that already
    /// exists replaces the earlier entry, which makes re-subscribing
    /// idempotent from the registry's point of view.
    pub fn insert_pending(&mut self, mut subscription: Subscription) {
        subscription.ack = None;
        subscription.active = false;
        self.pending_subscribes.push_back(subscription.id);
        self.subs.insert(subscription.id, subscription);
    }

    /// Queues an already-registered subscription for SUBACK resolution.
    ///
    /// Used on reconnect, after the subscribe request for an existing entry
    /// has been re-issued. Unknown ids are ignored.
    pub fn mark_pending(&mut self, id: i64) {
        if let Some(sub) = self.subs.get_mut(&id) {
            sub.ack = None;
            sub.active = false;
            self.pending_subscribes.push_back(id);
        }
    }

    /// Drops all in-flight acknowledgment state and deactivates every
    /// subscription. Called when a connection is (re)established: acks
    /// belonging to the previous connection will never arrive.
    pub fn reset_pending(&mut self) {
        self.pending_subscribes.clear();
        self.pending_unsubscribes.clear();
        for sub in self.subs.values_mut() {
            sub.ack = None;
            sub.active = false;
        }
    }

    /// Resolves a SUBACK against the oldest pending subscribe request.
    ///
    /// On an accepted acknowledgment the subscription is marked active and
    /// the packet id is stored as its token. On a rejected acknowledgment
    /// the entry is removed — it must not linger as pending.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownAcknowledgment`] when no subscribe is
    /// pending, or when the pending id was removed before its ack arrived.
    /// Callers log this and continue; it is never fatal.
    pub fn resolve_subscribe(
        &mut self,
        pkid: u16,
        accepted: bool,
    ) -> Result<Subscription, BridgeError> {
        let id = self
            .pending_subscribes
            .pop_front()
            .ok_or(BridgeError::UnknownAcknowledgment(pkid))?;
        if accepted {
            if let Some(sub) = self.subs.get_mut(&id) {
                sub.ack = Some(pkid);
                sub.active = true;
                return Ok(sub.clone());
            }
        } else if let Some(sub) = self.subs.remove(&id) {
            return Ok(sub);
        }
        Err(BridgeError::UnknownAcknowledgment(pkid))
    }

    /// Removes a subscription by id.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::SubscriptionNotFound`] if no entry exists.
    pub fn remove(&mut self, id: i64) -> Result<Subscription, BridgeError> {
        self.subs
            .remove(&id)
            .ok_or(BridgeError::SubscriptionNotFound(id))
    }

    /// Records an unsubscribe request in flight, for UNSUBACK correlation.
    pub fn push_pending_unsubscribe(&mut self, id: i64, topic: String) {
        self.pending_unsubscribes.push_back((id, topic));
    }

    /// Resolves an UNSUBACK against the oldest pending unsubscribe.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownAcknowledgment`] when no unsubscribe
    /// is pending.
    pub fn resolve_unsubscribe(&mut self, pkid: u16) -> Result<(i64, String), BridgeError> {
        self.pending_unsubscribes
            .pop_front()
            .ok_or(BridgeError::UnknownAcknowledgment(pkid))
    }

    /// All subscriptions whose topic equals the given topic exactly.
    ///
    /// Multiple subscriptions may share one topic; each gets its own
    /// forwarding call.
    #[must_use]
    pub fn subscriptions_for_topic(&self, topic: &str) -> Vec<Subscription> {
        self.subs
            .values()
            .filter(|sub| sub.topic == topic)
            .cloned()
            .collect()
    }

    /// Snapshot of all subscriptions, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self.subs.values().cloned().collect();
        subs.sort_by_key(|sub| sub.id);
        subs
    }
}
