//! Ownership of every long-lived store subscription.
//!
//! Each slot holds at most one live subscription. A forwarding task per
//! subscription tags every snapshot with `(slot, generation)` and pushes it
//! into one shared channel, which the client loop drains. Replacing or
//! cancelling a slot bumps its generation first, so anything still queued
//! from the previous subscription is recognised as stale and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use murmur_shared::constants::{
    COLLECTION_GROUPS, COLLECTION_MESSAGES, COLLECTION_SHARED_THEMES, COLLECTION_USERS,
};
use murmur_shared::{ConversationKey, UserId};
use murmur_store::{Direction, DocumentStore, Query, Snapshot, StoreError, SubscriptionId};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Messages of the open conversation.
    Messages,
    /// Every user.
    Roster,
    /// Groups the signed-in user belongs to.
    Groups,
    /// Shared theme of the open direct chat or group.
    SharedTheme,
    /// Newest messages across all conversations, for notifications.
    Feed,
}

pub type Generation = u64;

/// One snapshot (or terminal error) from a subscription.
#[derive(Debug)]
pub struct Delivery {
    pub slot: Slot,
    pub generation: Generation,
    pub result: Result<Snapshot, StoreError>,
}

struct ActiveSubscription {
    id: SubscriptionId,
    generation: Generation,
    forwarder: JoinHandle<()>,
}

pub struct SubscriptionManager {
    store: Arc<dyn DocumentStore>,
    tx: mpsc::UnboundedSender<Delivery>,
    active: HashMap<Slot, ActiveSubscription>,
    generations: HashMap<Slot, Generation>,
}

impl SubscriptionManager {
    /// Returns the manager and the receiving end of the delivery channel.
    pub fn new(store: Arc<dyn DocumentStore>) -> (Self, mpsc::UnboundedReceiver<Delivery>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Self {
            store,
            tx,
            active: HashMap::new(),
            generations: HashMap::new(),
        };
        (manager, rx)
    }

    /// Tear down whatever `slot` holds and subscribe to `query` in its place.
    ///
    /// On failure the slot is left empty and the error returned; the old
    /// subscription is gone either way.
    pub async fn replace(&mut self, slot: Slot, query: Query) -> Result<Generation, StoreError> {
        self.cancel(slot).await;
        let generation = self.current_generation(slot);

        let subscription = self.store.subscribe(query).await?;
        let forwarder = tokio::spawn(forward(
            slot,
            generation,
            subscription.snapshots,
            self.tx.clone(),
        ));
        debug!(?slot, generation, subscription = subscription.id, "Subscription replaced");
        self.active.insert(
            slot,
            ActiveSubscription {
                id: subscription.id,
                generation,
                forwarder,
            },
        );
        Ok(generation)
    }

    /// Stop the subscription in `slot`, if any, and invalidate its deliveries.
    pub async fn cancel(&mut self, slot: Slot) {
        *self.generations.entry(slot).or_insert(0) += 1;
        if let Some(active) = self.active.remove(&slot) {
            active.forwarder.abort();
            self.store.unsubscribe(active.id).await;
            debug!(?slot, generation = active.generation, "Subscription cancelled");
        }
    }

    pub async fn cancel_all(&mut self) {
        let slots: Vec<Slot> = self.active.keys().copied().collect();
        for slot in slots {
            self.cancel(slot).await;
        }
    }

    /// Whether a delivery tagged `(slot, generation)` comes from the live
    /// subscription.
    pub fn is_current(&self, slot: Slot, generation: Generation) -> bool {
        self.active
            .get(&slot)
            .is_some_and(|a| a.generation == generation)
    }

    pub fn is_active(&self, slot: Slot) -> bool {
        self.active.contains_key(&slot)
    }

    pub fn current_generation(&self, slot: Slot) -> Generation {
        self.generations.get(&slot).copied().unwrap_or(0)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        for active in self.active.values() {
            active.forwarder.abort();
        }
    }
}

async fn forward(
    slot: Slot,
    generation: Generation,
    mut snapshots: mpsc::UnboundedReceiver<Result<Snapshot, StoreError>>,
    tx: mpsc::UnboundedSender<Delivery>,
) {
    while let Some(result) = snapshots.recv().await {
        let terminal = result.is_err();
        let delivery = Delivery {
            slot,
            generation,
            result,
        };
        if tx.send(delivery).is_err() || terminal {
            break;
        }
    }
    debug!(?slot, generation, "Subscription stream ended");
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

pub fn messages_query(key: &ConversationKey) -> Query {
    Query::collection(COLLECTION_MESSAGES)
        .where_eq("conversationId", key.as_str())
        .order_by("createdAt", Direction::Ascending)
}

pub fn roster_query() -> Query {
    Query::collection(COLLECTION_USERS)
}

pub fn groups_query(member: &UserId) -> Query {
    Query::collection(COLLECTION_GROUPS).array_contains("members", member.as_str())
}

pub fn shared_theme_query(key: &ConversationKey) -> Query {
    Query::document(COLLECTION_SHARED_THEMES, key.as_str())
}

pub fn feed_query(limit: usize) -> Query {
    Query::collection(COLLECTION_MESSAGES)
        .order_by("createdAt", Direction::Descending)
        .limit(limit)
}
