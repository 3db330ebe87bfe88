//! Shared-field mutations.
//!
//! Every set-valued field (reactions, block lists, group members) changes
//! only through union/remove, and every shared map changes only through
//! field-level merges. Concurrent edits from different users therefore
//! commute, and replaying an operation is harmless.

use std::sync::Arc;

use murmur_shared::constants::{COLLECTION_GROUPS, COLLECTION_MESSAGES, COLLECTION_SHARED_THEMES, COLLECTION_USERS};
use murmur_shared::{direct_key, ConversationKey, Group, GroupId, MessageId, UserId};
use murmur_store::{lookup_set_contains, DocPath, DocumentStore, Fields, SetOp, WriteMode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ClientError, Result};

/// Partial update of a conversation's shared look. `Some("")` clears a field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThemeUpdate {
    pub theme_color: Option<String>,
    pub wallpaper: Option<String>,
}

impl ThemeUpdate {
    pub fn is_empty(&self) -> bool {
        self.theme_color.is_none() && self.wallpaper.is_none()
    }
}

/// Partial update of the overrides kept about one contact.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactSettingsUpdate {
    pub nickname: Option<String>,
    pub theme_color: Option<String>,
    pub wallpaper: Option<String>,
}

impl ContactSettingsUpdate {
    fn theme(&self) -> ThemeUpdate {
        ThemeUpdate {
            theme_color: self.theme_color.clone(),
            wallpaper: self.wallpaper.clone(),
        }
    }
}

#[derive(Clone)]
pub struct MutationOps {
    store: Arc<dyn DocumentStore>,
}

impl MutationOps {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Flip `user`'s `emoji` reaction on a message. Returns whether the user
    /// reacts after the call.
    pub async fn toggle_reaction(&self, message: &MessageId, emoji: &str, user: &UserId) -> Result<bool> {
        if emoji.is_empty() || emoji.contains('.') {
            return Err(ClientError::InvalidInput(format!("bad reaction '{emoji}'")));
        }
        let path = DocPath::new(COLLECTION_MESSAGES, message.as_str());
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| ClientError::NotFound(path.to_string()))?;

        let field = format!("reactions.{emoji}");
        let member = Value::String(user.to_string());
        let reacted = lookup_set_contains(&doc.data, &field, &member);
        let op = if reacted { SetOp::Remove } else { SetOp::Union };
        self.store.mutate_set(&path, &field, op, member).await?;
        debug!(message = %message, emoji, ?op, "Reaction toggled");
        Ok(!reacted)
    }

    pub async fn set_blocked(&self, me: &UserId, other: &UserId, blocked: bool) -> Result<()> {
        if me == other {
            return Err(ClientError::InvalidInput("cannot block yourself".into()));
        }
        let path = DocPath::new(COLLECTION_USERS, me.as_str());
        let op = if blocked { SetOp::Union } else { SetOp::Remove };
        self.store
            .mutate_set(&path, "blockedUsers", op, Value::String(other.to_string()))
            .await?;
        info!(user = %me.short(), other = %other.short(), blocked, "Block list updated");
        Ok(())
    }

    /// Block `other` if not blocked, unblock otherwise. Returns the new state.
    pub async fn toggle_block(&self, me: &UserId, other: &UserId) -> Result<bool> {
        let path = DocPath::new(COLLECTION_USERS, me.as_str());
        let blocked = match self.store.get(&path).await? {
            Some(doc) => lookup_set_contains(&doc.data, "blockedUsers", &Value::String(other.to_string())),
            None => false,
        };
        self.set_blocked(me, other, !blocked).await?;
        Ok(!blocked)
    }

    /// Remove `member` from a group. Only the creator may do this.
    pub async fn kick_member(&self, group: &Group, actor: &UserId, member: &UserId) -> Result<()> {
        if !group.is_creator(actor) {
            return Err(ClientError::NotPermitted(format!(
                "only the creator can remove members from {}",
                group.id
            )));
        }
        if actor == member {
            return Err(ClientError::InvalidInput("the creator cannot remove themselves".into()));
        }
        self.remove_member(&group.id, member).await?;
        info!(group = %group.id, member = %member.short(), "Member removed");
        Ok(())
    }

    pub async fn leave_group(&self, group: &GroupId, me: &UserId) -> Result<()> {
        self.remove_member(group, me).await?;
        info!(group = %group, "Left group");
        Ok(())
    }

    async fn remove_member(&self, group: &GroupId, member: &UserId) -> Result<()> {
        let path = DocPath::new(COLLECTION_GROUPS, group.as_str());
        self.store
            .mutate_set(&path, "members", SetOp::Remove, Value::String(member.to_string()))
            .await?;
        Ok(())
    }

    /// Merge a theme change into `shared_themes/{key}`.
    pub async fn set_shared_theme(&self, key: &ConversationKey, update: &ThemeUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        let path = DocPath::new(COLLECTION_SHARED_THEMES, key.as_str());
        let fields = Fields::new()
            .set_opt("themeColor", update.theme_color.clone())
            .set_opt("wallpaper", update.wallpaper.clone())
            .server_timestamp("updatedAt");
        self.store.write(&path, fields, WriteMode::Merge).await?;
        debug!(conversation = %key, "Shared theme updated");
        Ok(())
    }

    /// Merge per-contact overrides into the user's own document. Theme
    /// changes are mirrored to the direct conversation's shared theme.
    pub async fn update_contact_settings(
        &self,
        me: &UserId,
        other: &UserId,
        update: &ContactSettingsUpdate,
    ) -> Result<()> {
        if other.as_str().is_empty() || other.as_str().contains('.') {
            return Err(ClientError::InvalidInput(format!("bad contact id '{other}'")));
        }
        let prefix = format!("settings.{other}");
        let fields = Fields::new()
            .set_opt(format!("{prefix}.nickname"), update.nickname.clone())
            .set_opt(format!("{prefix}.themeColor"), update.theme_color.clone())
            .set_opt(format!("{prefix}.wallpaper"), update.wallpaper.clone());
        if fields.is_empty() {
            return Ok(());
        }
        let path = DocPath::new(COLLECTION_USERS, me.as_str());
        self.store.write(&path, fields, WriteMode::Merge).await?;

        let theme = update.theme();
        if !theme.is_empty() {
            self.set_shared_theme(&direct_key(me, other), &theme).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use murmur_shared::Record;
    use murmur_store::MemoryStore;
    use serde_json::json;

    use super::*;

    fn setup() -> (Arc<MemoryStore>, MutationOps) {
        let store = Arc::new(MemoryStore::default());
        let ops = MutationOps::new(store.clone());
        (store, ops)
    }

    fn reactors(store: &MemoryStore, id: &str, emoji: &str) -> Value {
        store.document(&DocPath::new(COLLECTION_MESSAGES, id)).unwrap()["reactions"][emoji].clone()
    }

    #[tokio::test]
    async fn test_reaction_toggle_twice_restores() {
        let (store, ops) = setup();
        store.insert_raw(
            COLLECTION_MESSAGES,
            "m1",
            json!({ "conversationId": "A_B", "senderId": "A", "reactions": { "❤️": ["carol"] } }),
        );
        let bob = UserId::new("bob");
        let m1 = MessageId::new("m1");

        assert!(ops.toggle_reaction(&m1, "❤️", &bob).await.unwrap());
        assert_eq!(reactors(&store, "m1", "❤️"), json!(["carol", "bob"]));

        assert!(!ops.toggle_reaction(&m1, "❤️", &bob).await.unwrap());
        assert_eq!(reactors(&store, "m1", "❤️"), json!(["carol"]));
    }

    #[tokio::test]
    async fn test_reaction_on_missing_message() {
        let (_store, ops) = setup();
        let err = ops
            .toggle_reaction(&MessageId::new("gone"), "👍", &UserId::new("bob"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_block_toggle() {
        let (store, ops) = setup();
        store.insert_raw(COLLECTION_USERS, "A", json!({ "displayName": "Alice" }));
        let me = UserId::new("A");
        let other = UserId::new("B");

        assert!(ops.toggle_block(&me, &other).await.unwrap());
        let user = murmur_shared::User::from_document(
            "A",
            &store.document(&DocPath::new(COLLECTION_USERS, "A")).unwrap(),
        )
        .unwrap();
        assert!(user.has_blocked(&other));

        assert!(!ops.toggle_block(&me, &other).await.unwrap());
        ops.set_blocked(&me, &other, false).await.unwrap();
        let body = store.document(&DocPath::new(COLLECTION_USERS, "A")).unwrap();
        assert_eq!(body["blockedUsers"], json!([]));
    }

    #[tokio::test]
    async fn test_kick_requires_creator() {
        let (store, ops) = setup();
        store.insert_raw(
            COLLECTION_GROUPS,
            "g1",
            json!({ "name": "Crew", "createdBy": "A", "members": ["A", "B", "C"] }),
        );
        let group = Group::from_document(
            "g1",
            &store.document(&DocPath::new(COLLECTION_GROUPS, "g1")).unwrap(),
        )
        .unwrap();

        let err = ops
            .kick_member(&group, &UserId::new("B"), &UserId::new("C"))
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NotPermitted(_)));
        assert_eq!(store.write_count(), 0);

        ops.kick_member(&group, &UserId::new("A"), &UserId::new("C")).await.unwrap();
        ops.kick_member(&group, &UserId::new("A"), &UserId::new("C")).await.unwrap();
        ops.leave_group(&group.id, &UserId::new("B")).await.unwrap();
        let body = store.document(&DocPath::new(COLLECTION_GROUPS, "g1")).unwrap();
        assert_eq!(body["members"], json!(["A"]));
    }

    #[tokio::test]
    async fn test_contact_settings_mirror_theme() {
        let (store, ops) = setup();
        store.insert_raw(
            COLLECTION_USERS,
            "B",
            json!({ "settings": { "A": { "nickname": "Al" } } }),
        );
        let update = ContactSettingsUpdate {
            theme_color: Some("#0af".into()),
            ..Default::default()
        };
        ops.update_contact_settings(&UserId::new("B"), &UserId::new("A"), &update)
            .await
            .unwrap();

        let me = store.document(&DocPath::new(COLLECTION_USERS, "B")).unwrap();
        assert_eq!(me["settings"]["A"]["nickname"], "Al");
        assert_eq!(me["settings"]["A"]["themeColor"], "#0af");

        let theme = store.document(&DocPath::new(COLLECTION_SHARED_THEMES, "A_B")).unwrap();
        assert_eq!(theme["themeColor"], "#0af");
        assert!(theme["updatedAt"].is_string());
    }

    #[tokio::test]
    async fn test_nickname_only_leaves_theme_alone() {
        let (store, ops) = setup();
        let update = ContactSettingsUpdate {
            nickname: Some("Bobby".into()),
            ..Default::default()
        };
        ops.update_contact_settings(&UserId::new("A"), &UserId::new("B"), &update)
            .await
            .unwrap();
        assert!(store.document(&DocPath::new(COLLECTION_SHARED_THEMES, "A_B")).is_none());
        assert_eq!(store.write_count(), 1);
    }
}
