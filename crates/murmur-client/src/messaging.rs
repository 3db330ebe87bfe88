//! User-initiated writes: sending, editing and deleting messages, group
//! creation and maintenance, and profile edits.
//!
//! Errors here are surfaced to the caller. Media is uploaded before any
//! document is written, so a failed upload leaves no trace in the store.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use murmur_shared::constants::{COLLECTION_GROUPS, COLLECTION_MESSAGES, COLLECTION_USERS};
use murmur_shared::{
    Clock, ConversationTarget, DeliveryState, GroupId, MediaKind, Message, MessageId, Record,
    UserId,
};
use murmur_store::document::timestamp_value;
use murmur_store::{lookup, DocPath, DocumentStore, Fields, WriteMode};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::{ClientError, Result};
use crate::media::{avatar_prefix, group_prefix, message_prefix, MediaUpload, MediaUploader};
use crate::session::SessionContext;
use crate::state::SyncState;

/// A message about to be sent.
#[derive(Debug, Clone, Default)]
pub struct OutgoingMessage {
    pub text: String,
    pub media: Option<MediaUpload>,
    /// Deliver at this time instead of now.
    pub scheduled_at: Option<DateTime<Utc>>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_media(mut self, media: MediaUpload) -> Self {
        self.media = Some(media);
        self
    }

    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }
}

/// Changes to a group's metadata. Absent fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub theme_color: Option<String>,
    pub wallpaper: Option<String>,
    pub message_size: Option<u32>,
    pub photo: Option<MediaUpload>,
}

/// Changes to the signed-in user's profile. Absent fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
    /// New avatar. Its uploaded URL replaces `photo_url`.
    pub photo: Option<MediaUpload>,
    pub bio: Option<String>,
    pub status: Option<String>,
    pub wallpaper: Option<String>,
    pub location: Option<String>,
    pub instagram: Option<String>,
    pub telegram: Option<String>,
    pub link: Option<String>,
    pub facebook: Option<String>,
}

pub struct Messenger {
    store: Arc<dyn DocumentStore>,
    uploader: Arc<dyn MediaUploader>,
    clock: Arc<dyn Clock>,
}

impl Messenger {
    pub fn new(store: Arc<dyn DocumentStore>, uploader: Arc<dyn MediaUploader>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            uploader,
            clock,
        }
    }

    /// Send `outgoing` to the open conversation.
    pub async fn send(&self, session: &SessionContext, state: &SyncState, outgoing: OutgoingMessage) -> Result<MessageId> {
        let me = session.self_id();
        let text = outgoing.text;
        if text.trim().is_empty() && outgoing.media.is_none() {
            return Err(ClientError::EmptyMessage);
        }
        if let ConversationTarget::Direct(recipient) = &session.target {
            if state.user(recipient).is_some_and(|r| r.has_blocked(me)) {
                return Err(ClientError::BlockedByRecipient);
            }
        }

        let now = self.clock.now();
        let scheduled_at = outgoing.scheduled_at.filter(|at| *at > now);

        let mut uploaded: Option<(MediaKind, String, Option<f64>)> = None;
        if let Some(media) = outgoing.media {
            let kind = media.kind;
            let duration = media.duration;
            let url = self
                .uploader
                .upload(media, &message_prefix(kind, &session.key))
                .await?;
            uploaded = Some((kind, url, duration));
        }

        let profile = state.user(me);
        let mut fields = Fields::new()
            .set("conversationId", session.key.as_str())
            .set("senderId", me.as_str())
            .set("text", text)
            .set("senderName", session.display_name(profile))
            .set_opt("senderPhotoURL", session.photo_url(profile))
            .set_opt(
                "senderThemeColor",
                state.shared_theme.as_ref().and_then(|t| t.theme_color.clone()),
            )
            .set("edited", false)
            .set("reactions", Value::Object(Default::default()))
            .set("seenBy", Value::Array(Vec::new()));
        if let Some((kind, url, duration)) = &uploaded {
            fields = fields.set(kind.field(), url.as_str());
            if *kind == MediaKind::Voice {
                fields = fields.set_opt("audioDuration", *duration);
            }
        }
        fields = match scheduled_at {
            Some(at) => fields
                .set("createdAt", timestamp_value(at))
                .set("scheduledAt", timestamp_value(at))
                .set("status", DeliveryState::Scheduled.as_str()),
            None => fields
                .server_timestamp("createdAt")
                .set("scheduledAt", Value::Null)
                .set("status", DeliveryState::Sent.as_str()),
        };

        match self.store.add(COLLECTION_MESSAGES, fields).await {
            Ok(id) => {
                info!(
                    conversation = %session.key,
                    message = %id,
                    scheduled = scheduled_at.is_some(),
                    "Message sent"
                );
                Ok(MessageId::new(id))
            }
            Err(e) => {
                if let Some((_, url, _)) = uploaded {
                    self.discard_media(&[url]).await;
                }
                Err(e.into())
            }
        }
    }

    /// Replace the text of one of the user's own messages. Blank text is
    /// ignored.
    pub async fn edit(&self, session: &SessionContext, id: &MessageId, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        let (path, _) = self.own_message(session, id).await?;
        let fields = Fields::new()
            .set("text", text)
            .set("edited", true)
            .server_timestamp("editedAt");
        self.store.write(&path, fields, WriteMode::Merge).await?;
        info!(message = %id, "Message edited");
        Ok(())
    }

    /// Delete one of the user's own messages, then its media.
    pub async fn delete(&self, session: &SessionContext, id: &MessageId) -> Result<()> {
        let (path, message) = self.own_message(session, id).await?;
        self.store.delete(&path).await?;
        self.discard_media(&message.media_urls()).await;
        info!(message = %id, "Message deleted");
        Ok(())
    }

    /// Delete every loaded message of the open conversation. Returns how many
    /// were removed.
    ///
    /// Deletes are issued together and a refused one does not stop the rest,
    /// so a clear can be partial. Only when nothing could be deleted is the
    /// first error returned.
    pub async fn clear_conversation(&self, session: &SessionContext, state: &SyncState) -> Result<usize> {
        let targets: Vec<&Message> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == session.key)
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let deletes = targets.iter().map(|message| {
            let path = DocPath::new(COLLECTION_MESSAGES, message.id.as_str());
            async move { (*message, self.store.delete(&path).await) }
        });

        let mut removed = 0;
        let mut first_error = None;
        for (message, result) in join_all(deletes).await {
            match result {
                Ok(()) => {
                    self.discard_media(&message.media_urls()).await;
                    removed += 1;
                }
                Err(e) => {
                    warn!(message = %message.id, error = %e, "Failed to delete message");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) if removed == 0 => Err(e.into()),
            _ => {
                info!(conversation = %session.key, removed, failed = targets.len() - removed, "Conversation cleared");
                Ok(removed)
            }
        }
    }

    /// Create a group owned by the signed-in user.
    pub async fn create_group(&self, session: &SessionContext, name: &str, members: &[UserId]) -> Result<GroupId> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::InvalidInput("group name is required".into()));
        }
        let me = session.self_id();
        let others: BTreeSet<&UserId> = members.iter().filter(|m| *m != me).collect();
        if others.is_empty() {
            return Err(ClientError::InvalidInput("select at least one member".into()));
        }

        let mut roster = vec![Value::String(me.to_string())];
        roster.extend(others.iter().map(|m| Value::String(m.to_string())));
        let fields = Fields::new()
            .set("name", name)
            .set("createdBy", me.as_str())
            .set("members", Value::Array(roster))
            .server_timestamp("createdAt");
        let id = self.store.add(COLLECTION_GROUPS, fields).await?;
        info!(group = %id, members = others.len() + 1, "Group created");
        Ok(GroupId::new(id))
    }

    /// Update group metadata. Only the creator may do this.
    pub async fn update_group(
        &self,
        session: &SessionContext,
        state: &SyncState,
        id: &GroupId,
        update: GroupUpdate,
    ) -> Result<()> {
        let group = state
            .group(id)
            .ok_or_else(|| ClientError::NotFound(format!("group {id}")))?;
        if !group.is_creator(session.self_id()) {
            return Err(ClientError::NotPermitted(format!("only the creator can edit {id}")));
        }
        let name = match update.name {
            Some(n) if n.trim().is_empty() => {
                return Err(ClientError::InvalidInput("group name cannot be empty".into()));
            }
            other => other.map(|n| n.trim().to_string()),
        };

        let photo_url = match update.photo {
            Some(photo) => Some(self.uploader.upload(photo, &group_prefix(id)).await?),
            None => None,
        };
        let fields = Fields::new()
            .set_opt("name", name)
            .set_opt("themeColor", update.theme_color)
            .set_opt("wallpaper", update.wallpaper)
            .set_opt("messageSize", update.message_size)
            .set_opt("photoURL", photo_url);
        if fields.is_empty() {
            return Ok(());
        }
        self.store
            .write(&DocPath::new(COLLECTION_GROUPS, id.as_str()), fields, WriteMode::Merge)
            .await?;
        info!(group = %id, "Group updated");
        Ok(())
    }

    pub async fn update_profile(&self, session: &SessionContext, update: ProfileUpdate) -> Result<()> {
        if update
            .display_name
            .as_ref()
            .is_some_and(|n| n.trim().is_empty())
        {
            return Err(ClientError::InvalidInput("display name cannot be empty".into()));
        }
        let me = session.self_id();
        let mut fields = Fields::new();
        let photo_url = match update.photo {
            Some(photo) => {
                let url = self.uploader.upload(photo, &avatar_prefix(me)).await?;
                fields = fields.server_timestamp("updatedAt");
                Some(url)
            }
            None => update.photo_url,
        };
        let fields = fields
            .set_opt("displayName", update.display_name.map(|n| n.trim().to_string()))
            .set_opt("photoURL", photo_url)
            .set_opt("bio", update.bio)
            .set_opt("status", update.status)
            .set_opt("wallpaper", update.wallpaper)
            .set_opt("location", update.location)
            .set_opt("instagram", update.instagram)
            .set_opt("telegram", update.telegram)
            .set_opt("link", update.link)
            .set_opt("facebook", update.facebook);
        if fields.is_empty() {
            return Ok(());
        }
        let path = DocPath::new(COLLECTION_USERS, me.as_str());
        self.store.write(&path, fields, WriteMode::Merge).await?;
        info!(user = %me.short(), "Profile updated");
        Ok(())
    }

    /// Copy the identity provider's profile into the user's document. A
    /// photo already stored there wins over the provider's.
    pub async fn sync_profile(&self, session: &SessionContext) -> Result<()> {
        let auth = &session.user;
        let path = DocPath::new(COLLECTION_USERS, auth.id.as_str());
        let has_photo = self
            .store
            .get(&path)
            .await?
            .and_then(|doc| lookup(&doc.data, "photoURL").and_then(Value::as_str).map(str::to_string))
            .is_some_and(|url| !url.is_empty());
        let display_name = auth.display_name.clone().or_else(|| {
            auth.email
                .as_deref()
                .and_then(|e| e.split('@').next())
                .filter(|local| !local.is_empty())
                .map(str::to_string)
        });
        let fields = Fields::new()
            .set_opt("displayName", display_name)
            .set_opt("email", auth.email.clone())
            .set_opt("photoURL", if has_photo { None } else { auth.photo_url.clone() });
        if fields.is_empty() {
            return Ok(());
        }
        self.store.write(&path, fields, WriteMode::Merge).await?;
        Ok(())
    }

    async fn own_message(&self, session: &SessionContext, id: &MessageId) -> Result<(DocPath, Message)> {
        let path = DocPath::new(COLLECTION_MESSAGES, id.as_str());
        let doc = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| ClientError::NotFound(format!("message {id}")))?;
        let message = Message::from_document(&doc.id, &doc.data)?;
        if &message.sender_id != session.self_id() {
            return Err(ClientError::NotPermitted(format!("message {id} belongs to someone else")));
        }
        Ok((path, message))
    }

    async fn discard_media(&self, urls: &[String]) {
        for url in urls {
            if let Err(e) = self.uploader.delete(url).await {
                warn!(url = %url, error = %e, "Failed to delete media");
            }
        }
    }
}
