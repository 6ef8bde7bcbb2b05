//! Subscription manager for broadcasting table changes.

use crossbeam_channel::{bounded, unbounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::types::{
    ChangeEvent, DropReason, StoreEvent, SubscriptionConfig, SubscriptionHandle, SubscriptionId,
};

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    sender: Sender<StoreEvent>,
}

impl Subscription {
    /// Try to send an event. On failure, returns why the subscriber should go.
    fn try_send(&self, event: StoreEvent) -> Result<(), DropReason> {
        match self.sender.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(DropReason::BufferOverflow),
            Err(TrySendError::Disconnected(_)) => Err(DropReason::Disconnected),
        }
    }
}

/// Registry of subscriptions and synchronous fan-out of change events.
///
/// Subscribers are kept in registration order and every event is offered to
/// them in that order. A delivery pass holds the read lock for its whole
/// duration, so an `unsubscribe` racing with it only takes effect for the
/// next event.
pub struct SubscriptionManager {
    /// Active subscriptions, ordered by id.
    subscriptions: RwLock<BTreeMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    /// Create a new subscription manager.
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscription. Only changes published after this call are
    /// delivered.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = match config.buffer_size {
            Some(size) => bounded(size.max(1)),
            None => unbounded(),
        };

        debug!(
            id = id.0,
            table = %config.filter.table,
            event = ?config.filter.event,
            "Subscribed"
        );
        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        SubscriptionHandle { id, receiver }
    }

    /// Unsubscribe and clean up. Returns false if the id was unknown.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscriptions.write().remove(&id);
        match removed {
            Some(sub) => {
                // Best effort; the receiver may already be gone.
                let _ = sub.sender.try_send(StoreEvent::Dropped {
                    reason: DropReason::Unsubscribed,
                });
                true
            }
            None => false,
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Deliver each event, in order, to every matching subscriber.
    pub fn publish(&self, events: &[ChangeEvent]) {
        for event in events {
            self.broadcast(event);
        }
    }

    /// Deliver one event. Drops subscribers that fail to receive.
    pub fn broadcast(&self, event: &ChangeEvent) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if !sub.config.filter.matches(event) {
                    continue;
                }
                if let Err(reason) = sub.try_send(StoreEvent::Change(event.clone())) {
                    to_remove.push((*id, reason));
                }
            }
        }

        // Remove dropped subscriptions
        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for (id, reason) in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    warn!(id = id.0, reason = ?reason, "Dropping subscriber");
                    // Might fail if the buffer is still full; that's ok
                    let _ = sub.sender.try_send(StoreEvent::Dropped { reason });
                }
            }
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}
