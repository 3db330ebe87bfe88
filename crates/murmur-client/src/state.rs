//! Local slices of remote state.
//!
//! [`SyncState`] is owned by the client loop and has no other writer. Each
//! slice is replaced wholesale from the latest snapshot of its subscription.

use std::collections::BTreeMap;

use murmur_shared::{Group, GroupId, Message, MessageId, Record, SharedTheme, User, UserId};
use murmur_store::{Document, Snapshot};
use tracing::warn;

use crate::subscriptions::Slot;

#[derive(Debug, Clone, Default)]
pub struct SyncState {
    /// Open conversation, oldest first.
    pub messages: Vec<Message>,
    pub users: BTreeMap<UserId, User>,
    /// Joined groups, newest first.
    pub groups: Vec<Group>,
    pub shared_theme: Option<SharedTheme>,
    /// Newest messages across conversations, newest first.
    pub feed: Vec<Message>,
}

impl SyncState {
    pub fn user(&self, id: &UserId) -> Option<&User> {
        self.users.get(id)
    }

    pub fn group(&self, id: &GroupId) -> Option<&Group> {
        self.groups.iter().find(|g| &g.id == id)
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Replace the slice fed by `slot` with the contents of `snapshot`.
    pub fn apply(&mut self, slot: Slot, snapshot: &Snapshot) {
        match slot {
            Slot::Messages => self.messages = decode_docs(&snapshot.docs),
            Slot::Feed => self.feed = decode_docs(&snapshot.docs),
            Slot::Roster => {
                self.users = decode_docs::<User>(&snapshot.docs)
                    .into_iter()
                    .map(|u| (u.id.clone(), u))
                    .collect();
            }
            Slot::Groups => {
                let mut groups: Vec<Group> = decode_docs(&snapshot.docs);
                // Undated groups sort last.
                groups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                self.groups = groups;
            }
            Slot::SharedTheme => {
                self.shared_theme = decode_docs::<SharedTheme>(&snapshot.docs).into_iter().next();
            }
        }
    }

    /// Drop everything tied to the open conversation.
    pub fn clear_conversation(&mut self) {
        self.messages.clear();
        self.shared_theme = None;
    }
}

/// Decode every document that parses as `T`, skipping and logging the rest.
pub fn decode_docs<T: Record>(docs: &[Document]) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match T::from_document(&doc.id, &doc.data) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(id = %doc.id, error = %e, "Skipping undecodable document");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(id: &str, data: serde_json::Value) -> Document {
        Document {
            id: id.to_string(),
            data,
        }
    }

    #[test]
    fn test_groups_sorted_newest_first() {
        let snapshot = Snapshot {
            docs: vec![
                doc("old", json!({ "name": "Old", "createdAt": "2026-01-01T00:00:00Z" })),
                doc("undated", json!({ "name": "Pending" })),
                doc("new", json!({ "name": "New", "createdAt": "2026-02-01T00:00:00Z" })),
            ],
            changes: Vec::new(),
        };
        let mut state = SyncState::default();
        state.apply(Slot::Groups, &snapshot);
        let ids: Vec<&str> = state.groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old", "undated"]);
    }

    #[test]
    fn test_bad_documents_are_skipped() {
        let snapshot = Snapshot {
            docs: vec![
                doc("m1", json!({ "conversationId": "A_B", "senderId": "A", "text": "hi" })),
                doc("m2", json!({ "text": 42 })),
            ],
            changes: Vec::new(),
        };
        let mut state = SyncState::default();
        state.apply(Slot::Messages, &snapshot);
        assert_eq!(state.messages.len(), 1);
        assert!(state.message(&MessageId::new("m1")).is_some());
    }

    #[test]
    fn test_missing_theme_clears_slice() {
        let mut state = SyncState {
            shared_theme: Some(SharedTheme::default()),
            ..Default::default()
        };
        state.apply(Slot::SharedTheme, &Snapshot::default());
        assert!(state.shared_theme.is_none());
    }
}
