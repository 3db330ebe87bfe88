//! Domain records as they are persisted in the document store.
//!
//! Field names follow the store's camelCase schema. The document id is not
//! part of the body; [`Record::from_document`] fills it in after decoding.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::DEFAULT_MESSAGE_SIZE;
use crate::identity::ConversationKey;
use crate::types::{GroupId, MessageId, UserId};

/// A record decoded from a store document body.
pub trait Record: DeserializeOwned {
    fn set_id(&mut self, id: &str);

    fn from_document(id: &str, body: &serde_json::Value) -> serde_json::Result<Self> {
        let mut record: Self = serde_json::from_value(body.clone())?;
        record.set_id(id);
        Ok(record)
    }
}

/// Treat an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// Per-contact overrides one user keeps about another.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ContactSettings {
    pub nickname: Option<String>,
    pub theme_color: Option<String>,
    pub wallpaper: Option<String>,
}

/// A registered user. Written only by its owner, except through set mutations.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    #[serde(skip)]
    pub id: UserId,
    pub display_name: Option<String>,
    pub email: Option<String>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub bio: Option<String>,
    pub location: Option<String>,
    pub instagram: Option<String>,
    pub telegram: Option<String>,
    pub link: Option<String>,
    pub facebook: Option<String>,
    pub status: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub wallpaper: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub blocked_users: BTreeSet<UserId>,
    #[serde(deserialize_with = "null_as_default")]
    pub settings: BTreeMap<UserId, ContactSettings>,
}

impl User {
    /// Display name, falling back to the local part of the email address.
    pub fn resolved_name(&self) -> Option<String> {
        self.display_name
            .as_ref()
            .filter(|n| !n.trim().is_empty())
            .cloned()
            .or_else(|| {
                self.email
                    .as_ref()
                    .and_then(|e| e.split('@').next())
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            })
    }

    pub fn has_blocked(&self, other: &UserId) -> bool {
        self.blocked_users.contains(other)
    }

    pub fn contact_settings(&self, other: &UserId) -> Option<&ContactSettings> {
        self.settings.get(other)
    }
}

impl Record for User {
    fn set_id(&mut self, id: &str) {
        self.id = UserId::new(id);
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    #[default]
    Sent,
    Scheduled,
    /// Legacy scalar seen marker; the `seenBy` set is authoritative.
    Seen,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Scheduled => "scheduled",
            Self::Seen => "seen",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Voice,
    Video,
}

impl MediaKind {
    /// Message field that carries a reference of this kind.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Image => "imageURL",
            Self::Voice => "voiceURL",
            Self::Video => "videoURL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub url: String,
    /// Voice note length in seconds.
    pub duration: Option<f64>,
}

/// A chat message.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(skip)]
    pub id: MessageId,
    pub conversation_id: ConversationKey,
    pub sender_id: UserId,
    #[serde(default, deserialize_with = "null_as_default")]
    pub text: String,
    #[serde(rename = "imageURL", default)]
    pub image_url: Option<String>,
    #[serde(rename = "voiceURL", default)]
    pub voice_url: Option<String>,
    #[serde(rename = "videoURL", default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub audio_duration: Option<f64>,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(rename = "senderPhotoURL", default)]
    pub sender_photo_url: Option<String>,
    #[serde(default)]
    pub sender_theme_color: Option<String>,
    /// `None` while the server timestamp is still pending.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: DeliveryState,
    #[serde(default, deserialize_with = "null_as_default")]
    pub edited: bool,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub reactions: BTreeMap<String, BTreeSet<UserId>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub seen_by: BTreeSet<UserId>,
}

impl Message {
    /// The single media attachment, if any.
    pub fn media(&self) -> Option<MediaRef> {
        let (kind, url) = if let Some(url) = &self.image_url {
            (MediaKind::Image, url)
        } else if let Some(url) = &self.video_url {
            (MediaKind::Video, url)
        } else if let Some(url) = &self.voice_url {
            (MediaKind::Voice, url)
        } else {
            return None;
        };
        Some(MediaRef {
            kind,
            url: url.clone(),
            duration: if kind == MediaKind::Voice {
                self.audio_duration
            } else {
                None
            },
        })
    }

    /// Every media URL attached, for deletion.
    pub fn media_urls(&self) -> Vec<String> {
        [&self.image_url, &self.voice_url, &self.video_url]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// Scheduled for delivery later than `now`.
    pub fn is_pending_at(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_some_and(|at| at > now)
    }

    /// Authors always see their messages; others only once they are due.
    pub fn is_visible_to(&self, viewer: &UserId, now: DateTime<Utc>) -> bool {
        &self.sender_id == viewer || !self.is_pending_at(now)
    }

    /// Seen by anyone other than the author. The legacy scalar `seen` status
    /// counts too.
    pub fn is_seen_by_recipient(&self) -> bool {
        self.status == DeliveryState::Seen || self.seen_by.iter().any(|u| u != &self.sender_id)
    }

    pub fn reactors(&self, emoji: &str) -> Option<&BTreeSet<UserId>> {
        self.reactions.get(emoji)
    }

    /// Whether `user` currently reacts with `emoji`.
    pub fn has_reaction(&self, emoji: &str, user: &UserId) -> bool {
        self.reactors(emoji).is_some_and(|set| set.contains(user))
    }
}

impl Record for Message {
    fn set_id(&mut self, id: &str) {
        self.id = MessageId::new(id);
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Group {
    #[serde(skip)]
    pub id: GroupId,
    #[serde(deserialize_with = "null_as_default")]
    pub name: String,
    pub created_by: Option<UserId>,
    #[serde(deserialize_with = "null_as_default")]
    pub members: BTreeSet<UserId>,
    pub theme_color: Option<String>,
    pub wallpaper: Option<String>,
    pub message_size: Option<u32>,
    #[serde(rename = "photoURL")]
    pub photo_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl Group {
    pub fn is_creator(&self, user: &UserId) -> bool {
        self.created_by.as_ref() == Some(user)
    }

    pub fn message_size(&self) -> u32 {
        self.message_size.unwrap_or(DEFAULT_MESSAGE_SIZE)
    }
}

impl Record for Group {
    fn set_id(&mut self, id: &str) {
        self.id = GroupId::new(id);
    }
}

// ---------------------------------------------------------------------------
// Shared theme
// ---------------------------------------------------------------------------

/// Per-conversation look shared by both participants.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SharedTheme {
    pub theme_color: Option<String>,
    pub wallpaper: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Record for SharedTheme {
    fn set_id(&mut self, _id: &str) {}
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_message_decodes_store_shape() {
        let body = json!({
            "conversationId": "A_B",
            "senderId": "A",
            "text": "hi",
            "imageURL": null,
            "voiceURL": "https://media/v.webm",
            "audioDuration": 3.5,
            "createdAt": "2026-01-01T10:00:00Z",
            "scheduledAt": null,
            "status": "sent",
            "reactions": { "❤️": ["B"] },
            "seenBy": null
        });
        let msg = Message::from_document("m1", &body).unwrap();
        assert_eq!(msg.id.as_str(), "m1");
        assert_eq!(msg.conversation_id.as_str(), "A_B");
        assert!(msg.has_reaction("❤️", &UserId::new("B")));
        assert!(msg.seen_by.is_empty());
        let media = msg.media().unwrap();
        assert_eq!(media.kind, MediaKind::Voice);
        assert_eq!(media.duration, Some(3.5));
    }

    #[test]
    fn test_scheduled_visibility() {
        let now = Utc::now();
        let msg = Message {
            sender_id: UserId::new("A"),
            status: DeliveryState::Scheduled,
            scheduled_at: Some(now + Duration::hours(1)),
            ..Default::default()
        };
        assert!(msg.is_pending_at(now));
        assert!(msg.is_visible_to(&UserId::new("A"), now));
        assert!(!msg.is_visible_to(&UserId::new("B"), now));
        assert!(msg.is_visible_to(&UserId::new("B"), now + Duration::hours(2)));
    }

    #[test]
    fn test_seen_by_author_alone_is_not_seen() {
        let mut msg = Message {
            sender_id: UserId::new("A"),
            ..Default::default()
        };
        msg.seen_by.insert(UserId::new("A"));
        assert!(!msg.is_seen_by_recipient());
        msg.seen_by.insert(UserId::new("B"));
        assert!(msg.is_seen_by_recipient());

        let legacy = Message {
            status: DeliveryState::Seen,
            ..Default::default()
        };
        assert!(legacy.is_seen_by_recipient());
    }

    #[test]
    fn test_user_resolved_name_falls_back_to_email() {
        let user = User {
            email: Some("carol@example.com".into()),
            ..Default::default()
        };
        assert_eq!(user.resolved_name().as_deref(), Some("carol"));
        assert_eq!(User::default().resolved_name(), None);
    }

    #[test]
    fn test_user_settings_keyed_by_contact() {
        let body = json!({
            "displayName": "Alice",
            "online": true,
            "blockedUsers": ["C"],
            "settings": { "B": { "nickname": "Bobby" } }
        });
        let user = User::from_document("A", &body).unwrap();
        assert!(user.has_blocked(&UserId::new("C")));
        let nick = user
            .contact_settings(&UserId::new("B"))
            .and_then(|s| s.nickname.clone());
        assert_eq!(nick.as_deref(), Some("Bobby"));
    }

    #[test]
    fn test_group_defaults() {
        let group = Group::from_document("g1", &json!({ "name": "Crew", "members": ["A"] })).unwrap();
        assert_eq!(group.message_size(), DEFAULT_MESSAGE_SIZE);
        assert!(!group.is_creator(&UserId::new("A")));
    }
}
