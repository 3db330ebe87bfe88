//! Read receipts.
//!
//! Marking is a set-union of the reader's id into `seenBy`, so concurrent
//! readers never overwrite each other and repeating a mark changes nothing.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use murmur_shared::constants::COLLECTION_MESSAGES;
use murmur_shared::{Message, MessageId, UserId};
use murmur_store::{DocPath, DocumentStore, SetOp};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct SeenTracker {
    window: usize,
    /// Marks issued but not yet reflected in a delivery.
    in_flight: HashSet<MessageId>,
}

impl SeenTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            in_flight: HashSet::new(),
        }
    }

    pub fn reset(&mut self) {
        self.in_flight.clear();
    }

    /// Messages among the last `window` of `messages` that `reader` should
    /// mark now.
    pub fn pending<'a>(&self, messages: &'a [Message], reader: &UserId, now: DateTime<Utc>) -> Vec<&'a Message> {
        let start = messages.len().saturating_sub(self.window);
        messages[start..]
            .iter()
            .filter(|m| &m.sender_id != reader)
            .filter(|m| !m.is_pending_at(now))
            .filter(|m| !m.seen_by.contains(reader))
            .filter(|m| !self.in_flight.contains(&m.id))
            .collect()
    }

    /// Mark every qualifying message seen by `reader`. Returns the number of
    /// writes issued. Failures are logged and the message becomes eligible
    /// again.
    pub async fn mark_seen(
        &mut self,
        store: &dyn DocumentStore,
        messages: &[Message],
        reader: &UserId,
        now: DateTime<Utc>,
    ) -> usize {
        self.reconcile(messages, reader);

        let targets: Vec<MessageId> = self
            .pending(messages, reader, now)
            .into_iter()
            .map(|m| m.id.clone())
            .collect();
        if targets.is_empty() {
            return 0;
        }
        self.in_flight.extend(targets.iter().cloned());

        let writes = targets.iter().map(|id| {
            let path = DocPath::new(COLLECTION_MESSAGES, id.as_str());
            async move {
                let result = store
                    .mutate_set(&path, "seenBy", SetOp::Union, Value::String(reader.to_string()))
                    .await;
                (id, result)
            }
        });

        for (id, result) in join_all(writes).await {
            if let Err(e) = result {
                if e.is_permission_denied() {
                    debug!(message = %id, error = %e, "Seen mark refused");
                } else {
                    warn!(message = %id, error = %e, "Seen mark failed");
                }
                self.in_flight.remove(id);
            }
        }
        debug!(count = targets.len(), reader = %reader.short(), "Marked messages seen");
        targets.len()
    }

    /// Drop in-flight marks that have landed or whose message is gone.
    fn reconcile(&mut self, messages: &[Message], reader: &UserId) {
        self.in_flight.retain(|id| {
            messages
                .iter()
                .find(|m| &m.id == id)
                .is_some_and(|m| !m.seen_by.contains(reader))
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;
    use murmur_shared::{Clock, ManualClock, Record};
    use murmur_store::MemoryStore;
    use serde_json::json;

    use super::*;

    fn load(store: &MemoryStore) -> Vec<Message> {
        store
            .documents(COLLECTION_MESSAGES)
            .iter()
            .map(|d| Message::from_document(&d.id, &d.data).unwrap())
            .collect()
    }

    fn seed(store: &MemoryStore, id: &str, sender: &str, extra: Value) {
        let mut body = json!({
            "conversationId": "A_B",
            "senderId": sender,
            "text": "hi",
            "createdAt": "2026-01-01T10:00:00Z",
        });
        if let (Some(body), Value::Object(extra)) = (body.as_object_mut(), extra) {
            body.extend(extra);
        }
        store.insert_raw(COLLECTION_MESSAGES, id, body);
    }

    #[tokio::test]
    async fn test_second_pass_writes_nothing() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = MemoryStore::new(clock.clone());
        seed(&store, "m1", "A", json!({}));
        seed(&store, "m2", "A", json!({}));
        seed(&store, "m3", "B", json!({}));
        let reader = UserId::new("B");
        let mut tracker = SeenTracker::new(50);

        let snapshot = load(&store);
        assert_eq!(tracker.mark_seen(&store, &snapshot, &reader, clock.now()).await, 2);
        assert_eq!(store.write_count(), 2);

        // Same stale slice: marks are still in flight.
        assert_eq!(tracker.mark_seen(&store, &snapshot, &reader, clock.now()).await, 0);
        // Fresh slice: marks have landed.
        assert_eq!(tracker.mark_seen(&store, &load(&store), &reader, clock.now()).await, 0);
        assert_eq!(store.write_count(), 2);

        let m1 = &load(&store)[0];
        assert!(m1.seen_by.contains(&reader));
    }

    #[tokio::test]
    async fn test_scheduled_and_out_of_window_skipped() {
        let now = Utc::now();
        let store = MemoryStore::default();
        let due = (now + Duration::hours(1)).to_rfc3339();
        seed(&store, "old", "A", json!({}));
        seed(&store, "future", "A", json!({ "scheduledAt": due, "status": "scheduled" }));
        seed(&store, "recent", "A", json!({}));
        let reader = UserId::new("B");
        let mut tracker = SeenTracker::new(2);

        let messages = load(&store);
        let pending: Vec<&str> = tracker
            .pending(&messages, &reader, now)
            .iter()
            .map(|m| m.id.as_str())
            .collect();
        assert_eq!(pending, vec!["recent"]);
        assert_eq!(tracker.mark_seen(&store, &messages, &reader, now).await, 1);
    }

    #[tokio::test]
    async fn test_failed_mark_is_retried() {
        let store = MemoryStore::default();
        seed(&store, "m1", "A", json!({}));
        store.deny_path(DocPath::new(COLLECTION_MESSAGES, "m1"));
        let reader = UserId::new("B");
        let mut tracker = SeenTracker::new(50);
        let messages = load(&store);

        assert_eq!(tracker.mark_seen(&store, &messages, &reader, Utc::now()).await, 1);
        assert_eq!(store.write_count(), 0);

        store.allow_all();
        assert_eq!(tracker.mark_seen(&store, &messages, &reader, Utc::now()).await, 1);
        assert_eq!(store.write_count(), 1);
    }
}
