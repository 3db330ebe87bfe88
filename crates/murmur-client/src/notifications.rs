//! Turning the cross-conversation message feed into user notifications.
//!
//! Each message is considered once. A message that passes every filter
//! produces exactly one in-app toast, and exactly one platform notification
//! when the window is hidden and the host granted permission.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use murmur_shared::{
    ConversationKey, MediaKind, Message, MessageId, NotificationPermission, User, UserId,
    Visibility,
};
use murmur_store::{ChangeKind, Snapshot};
use serde::Serialize;
use tracing::debug;

use crate::config::ClientConfig;
use crate::events::ClientEvent;
use crate::session::SessionContext;
use crate::state::decode_docs;

/// An in-app alert for one incoming message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Toast {
    pub message_id: MessageId,
    pub conversation_id: ConversationKey,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_photo_url: Option<String>,
    pub body: String,
    pub expires_at: DateTime<Utc>,
}

/// A notification for the host platform.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformNotification {
    pub title: String,
    pub body: String,
    pub icon: Option<String>,
    /// Sender id; the platform collapses notifications sharing a tag.
    pub tag: String,
}

/// Everything the router consults besides the message itself.
pub struct RouteContext<'a> {
    pub session: &'a SessionContext,
    pub users: &'a BTreeMap<UserId, User>,
    pub visibility: Visibility,
    pub permission: NotificationPermission,
    pub now: DateTime<Utc>,
}

pub struct NotificationRouter {
    config: ClientConfig,
    tolerance: Duration,
    toast_lifetime: Duration,
    /// Messages already decided on, with their `createdAt`. Entries older
    /// than `floor` are evicted.
    routed: HashMap<MessageId, DateTime<Utc>>,
    /// Oldest `createdAt` in the latest feed window. Anything older has
    /// either been decided on or predates the window.
    floor: Option<DateTime<Utc>>,
    /// Scheduled messages waiting for their time.
    parked: BTreeMap<MessageId, Message>,
    toast: Option<Toast>,
}

impl NotificationRouter {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            config: config.clone(),
            tolerance: config.tolerance(),
            toast_lifetime: config.toast_lifetime(),
            routed: HashMap::new(),
            floor: None,
            parked: BTreeMap::new(),
            toast: None,
        }
    }

    /// Forget everything; used at sign-out.
    pub fn reset(&mut self) {
        self.routed.clear();
        self.floor = None;
        self.parked.clear();
        self.toast = None;
    }

    pub fn active_toast(&self) -> Option<&Toast> {
        self.toast.as_ref()
    }

    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Route the messages a feed snapshot reports as added.
    pub fn route(&mut self, snapshot: &Snapshot, ctx: &RouteContext<'_>) -> Vec<ClientEvent> {
        for change in &snapshot.changes {
            if change.kind == ChangeKind::Removed {
                self.parked.remove(&MessageId::new(change.doc.id.as_str()));
            }
        }
        let added: Vec<_> = snapshot.added().cloned().collect();
        // The feed is newest first; alert in arrival order.
        let mut messages: Vec<Message> = decode_docs(&added);
        messages.reverse();

        let mut events = Vec::new();
        for message in messages {
            events.extend(self.consider(message, ctx));
        }

        let oldest = decode_docs::<Message>(&snapshot.docs)
            .iter()
            .filter_map(|m| m.created_at)
            .min();
        if let Some(oldest) = oldest {
            self.raise_floor(oldest);
        }
        events
    }

    fn raise_floor(&mut self, oldest: DateTime<Utc>) {
        if self.floor.is_some_and(|floor| floor >= oldest) {
            return;
        }
        self.floor = Some(oldest);
        self.routed.retain(|_, created| *created >= oldest);
    }

    fn mark_routed(&mut self, message: &Message, now: DateTime<Utc>) {
        self.routed
            .insert(message.id.clone(), message.created_at.unwrap_or(now));
    }

    /// Expire the toast and release scheduled messages that became due.
    pub fn tick(&mut self, ctx: &RouteContext<'_>) -> Vec<ClientEvent> {
        let mut events = Vec::new();

        if let Some(toast) = &self.toast {
            if ctx.now >= toast.expires_at {
                events.push(ClientEvent::ToastDismissed {
                    message_id: toast.message_id.clone(),
                });
                self.toast = None;
            }
        }

        let due: Vec<MessageId> = self
            .parked
            .iter()
            .filter(|(_, m)| !m.is_pending_at(ctx.now))
            .map(|(id, _)| id.clone())
            .collect();
        for id in due {
            if let Some(message) = self.parked.remove(&id) {
                events.extend(self.consider(message, ctx));
            }
        }
        events
    }

    fn consider(&mut self, message: Message, ctx: &RouteContext<'_>) -> Vec<ClientEvent> {
        if self.routed.contains_key(&message.id) {
            return Vec::new();
        }
        let below_floor = message
            .created_at
            .zip(self.floor)
            .is_some_and(|(created, floor)| created < floor);
        if below_floor {
            return Vec::new();
        }
        if !self.passes(&message, ctx) {
            return Vec::new();
        }
        if message.is_pending_at(ctx.now) {
            debug!(message = %message.id, "Parking scheduled message");
            self.parked.insert(message.id.clone(), message);
            return Vec::new();
        }
        self.mark_routed(&message, ctx.now);

        let sent_at = message.created_at.unwrap_or(ctx.now);
        let cutoff = ctx
            .session
            .started_at
            .checked_sub_signed(self.tolerance)
            .unwrap_or(ctx.session.started_at);
        if sent_at < cutoff {
            return Vec::new();
        }
        if message.conversation_id == ctx.session.key && ctx.visibility == Visibility::Visible {
            return Vec::new();
        }

        self.alert(&message, ctx)
    }

    /// Filters that hold for the message's whole lifetime. Messages failing
    /// them are recorded so they are never looked at again.
    fn passes(&mut self, message: &Message, ctx: &RouteContext<'_>) -> bool {
        let me = ctx.session.self_id();
        let relevant = message.conversation_id.involves(me)
            || self.config.is_public_channel(message.conversation_id.as_str());
        if &message.sender_id == me || !relevant {
            self.mark_routed(message, ctx.now);
            return false;
        }
        true
    }

    fn alert(&mut self, message: &Message, ctx: &RouteContext<'_>) -> Vec<ClientEvent> {
        let sender = ctx.users.get(&message.sender_id);
        let sender_name = sender
            .and_then(User::resolved_name)
            .or_else(|| message.sender_name.clone())
            .unwrap_or_else(|| "Someone".to_string());
        let photo = sender
            .and_then(|u| u.photo_url.clone())
            .or_else(|| message.sender_photo_url.clone());
        let body = preview(message);

        debug!(message = %message.id, sender = %message.sender_id.short(), "Routing notification");

        let toast = Toast {
            message_id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            sender_id: message.sender_id.clone(),
            sender_name: sender_name.clone(),
            sender_photo_url: photo.clone(),
            body: body.clone(),
            expires_at: ctx
                .now
                .checked_add_signed(self.toast_lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        };
        self.toast = Some(toast.clone());
        let mut events = vec![ClientEvent::Toast(toast)];

        if ctx.visibility == Visibility::Hidden && ctx.permission == NotificationPermission::Granted {
            events.push(ClientEvent::PlatformNotification(PlatformNotification {
                title: format!("New message from {sender_name}"),
                body,
                icon: photo,
                tag: message.sender_id.to_string(),
            }));
        }
        events
    }
}

/// Text shown for a message in alerts.
pub fn preview(message: &Message) -> String {
    if !message.text.trim().is_empty() {
        return message.text.clone();
    }
    match message.media().map(|m| m.kind) {
        Some(MediaKind::Image) => "📷 Sent an image".to_string(),
        Some(MediaKind::Voice) => "🎤 Sent a voice message".to_string(),
        Some(MediaKind::Video) => "🎥 Sent a video".to_string(),
        None => String::new(),
    }
}
