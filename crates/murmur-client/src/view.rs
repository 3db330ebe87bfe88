//! Joining the raw state slices into what the UI renders.
//!
//! Everything here is a pure function of the session, the slices and the
//! current time. Nothing is mutated, so views can be rebuilt after every
//! delivery.

use chrono::{DateTime, Duration, Utc};
use murmur_shared::constants::DEFAULT_MESSAGE_SIZE;
use murmur_shared::{
    ConversationKey, ConversationTarget, GroupId, MediaRef, Message, MessageId, User, UserId,
};
use serde::Serialize;

use crate::presence::{presence_of, Presence};
use crate::session::SessionContext;
use crate::state::SyncState;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HeaderKind {
    Direct {
        user_id: UserId,
        presence: Presence,
        blocked_by_me: bool,
    },
    Group {
        group_id: GroupId,
        member_count: usize,
        is_creator: bool,
    },
    Channel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationHeader {
    pub key: ConversationKey,
    pub title: String,
    /// The user's private name for the contact, shown instead of `title`.
    pub nickname: Option<String>,
    pub subtitle: String,
    pub photo_url: Option<String>,
    pub theme_color: Option<String>,
    pub wallpaper: Option<String>,
    pub message_size: u32,
    pub kind: HeaderKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionView {
    pub emoji: String,
    pub count: usize,
    pub reacted_by_me: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageView {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub sender_photo_url: Option<String>,
    pub is_mine: bool,
    pub theme_color: Option<String>,
    pub text: String,
    pub media: Option<MediaRef>,
    pub edited: bool,
    pub created_at: Option<DateTime<Utc>>,
    /// Set on the author's own messages that are still waiting to go out.
    pub scheduled_for: Option<DateTime<Utc>>,
    pub reactions: Vec<ReactionView>,
    pub seen: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub header: ConversationHeader,
    pub messages: Vec<MessageView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupEntry {
    pub id: GroupId,
    pub name: String,
    pub photo_url: Option<String>,
    pub member_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntry {
    pub id: UserId,
    pub name: String,
    pub nickname: Option<String>,
    pub photo_url: Option<String>,
    pub presence: Presence,
    pub presence_label: String,
    pub blocked: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SidebarView {
    pub groups: Vec<GroupEntry>,
    pub users: Vec<UserEntry>,
}

/// Inputs shared by every assembly function.
pub struct ViewContext<'a> {
    pub session: &'a SessionContext,
    pub state: &'a SyncState,
    pub now: DateTime<Utc>,
    pub trust_window: Duration,
}

impl ViewContext<'_> {
    fn me(&self) -> Option<&User> {
        self.state.user(self.session.self_id())
    }

    fn nickname_for(&self, other: &UserId) -> Option<String> {
        self.me()
            .and_then(|me| me.contact_settings(other))
            .and_then(|s| s.nickname.clone())
            .filter(|n| !n.trim().is_empty())
    }
}

pub fn conversation_view(ctx: &ViewContext<'_>) -> ConversationView {
    let header = header(ctx);
    let messages = message_views(ctx, &header);
    ConversationView { header, messages }
}

fn header(ctx: &ViewContext<'_>) -> ConversationHeader {
    let session = ctx.session;
    let shared = ctx.state.shared_theme.as_ref();
    let shared_color = shared.and_then(|t| t.theme_color.clone()).filter(|c| !c.is_empty());
    let shared_wallpaper = shared.and_then(|t| t.wallpaper.clone()).filter(|w| !w.is_empty());

    match &session.target {
        ConversationTarget::Direct(other) => {
            let user = ctx.state.user(other);
            let settings = ctx.me().and_then(|me| me.contact_settings(other));
            let presence = user
                .map(|u| presence_of(u, ctx.now, ctx.trust_window))
                .unwrap_or(Presence::Unknown);
            ConversationHeader {
                key: session.key.clone(),
                title: user
                    .and_then(User::resolved_name)
                    .unwrap_or_else(|| "User".to_string()),
                nickname: ctx.nickname_for(other),
                subtitle: presence.label(ctx.now),
                photo_url: user.and_then(|u| u.photo_url.clone()),
                theme_color: shared_color.or_else(|| settings.and_then(|s| s.theme_color.clone())),
                wallpaper: shared_wallpaper.or_else(|| settings.and_then(|s| s.wallpaper.clone())),
                message_size: DEFAULT_MESSAGE_SIZE,
                kind: HeaderKind::Direct {
                    user_id: other.clone(),
                    presence,
                    blocked_by_me: ctx.me().is_some_and(|me| me.has_blocked(other)),
                },
            }
        }
        ConversationTarget::Group(id) => {
            let group = ctx.state.group(id);
            let member_count = group.map(|g| g.members.len()).unwrap_or(0);
            ConversationHeader {
                key: session.key.clone(),
                title: group
                    .map(|g| g.name.clone())
                    .unwrap_or_else(|| id.to_string()),
                nickname: None,
                subtitle: format!("{member_count} members"),
                photo_url: group.and_then(|g| g.photo_url.clone()),
                theme_color: shared_color.or_else(|| group.and_then(|g| g.theme_color.clone())),
                wallpaper: shared_wallpaper.or_else(|| group.and_then(|g| g.wallpaper.clone())),
                message_size: group.map(|g| g.message_size()).unwrap_or(DEFAULT_MESSAGE_SIZE),
                kind: HeaderKind::Group {
                    group_id: id.clone(),
                    member_count,
                    is_creator: group.is_some_and(|g| g.is_creator(session.self_id())),
                },
            }
        }
        ConversationTarget::Channel(_) | ConversationTarget::None => ConversationHeader {
            key: session.key.clone(),
            title: format!("#{}", session.key),
            nickname: None,
            subtitle: "Public channel".to_string(),
            photo_url: None,
            theme_color: None,
            wallpaper: None,
            message_size: DEFAULT_MESSAGE_SIZE,
            kind: HeaderKind::Channel,
        },
    }
}

fn message_views(ctx: &ViewContext<'_>, header: &ConversationHeader) -> Vec<MessageView> {
    let me = ctx.session.self_id();
    let visible: Vec<&Message> = ctx
        .state
        .messages
        .iter()
        .filter(|m| m.is_visible_to(me, ctx.now))
        .collect();

    // Only the newest message carries a receipt, and only when it is ours.
    let receipt = visible
        .last()
        .filter(|m| &m.sender_id == me && m.is_seen_by_recipient())
        .map(|m| m.id.clone());

    visible
        .into_iter()
        .map(|m| {
            let is_mine = &m.sender_id == me;
            let sender = ctx.state.user(&m.sender_id);
            MessageView {
                id: m.id.clone(),
                sender_id: m.sender_id.clone(),
                sender_name: sender_name(ctx, m, sender),
                sender_photo_url: sender
                    .and_then(|u| u.photo_url.clone())
                    .or_else(|| m.sender_photo_url.clone()),
                is_mine,
                theme_color: m.sender_theme_color.clone().or_else(|| {
                    if is_mine {
                        header.theme_color.clone()
                    } else {
                        None
                    }
                }),
                text: m.text.clone(),
                media: m.media(),
                edited: m.edited,
                created_at: m.created_at,
                scheduled_for: m.scheduled_at.filter(|_| m.is_pending_at(ctx.now)),
                reactions: m
                    .reactions
                    .iter()
                    .filter(|(_, users)| !users.is_empty())
                    .map(|(emoji, users)| ReactionView {
                        emoji: emoji.clone(),
                        count: users.len(),
                        reacted_by_me: users.contains(me),
                    })
                    .collect(),
                seen: receipt.as_ref() == Some(&m.id),
            }
        })
        .collect()
}

fn sender_name(ctx: &ViewContext<'_>, message: &Message, sender: Option<&User>) -> String {
    ctx.nickname_for(&message.sender_id)
        .or_else(|| sender.and_then(User::resolved_name))
        .or_else(|| message.sender_name.clone().filter(|n| !n.is_empty()))
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Groups and contacts, filtered by a case-insensitive `search` over names and
/// nicknames. An empty search matches everything.
pub fn sidebar_view(ctx: &ViewContext<'_>, search: &str) -> SidebarView {
    let needle = search.trim().to_lowercase();
    let matches = |text: &str| needle.is_empty() || text.to_lowercase().contains(&needle);
    let me = ctx.session.self_id();

    let groups = ctx
        .state
        .groups
        .iter()
        .filter(|g| matches(&g.name))
        .map(|g| GroupEntry {
            id: g.id.clone(),
            name: g.name.clone(),
            photo_url: g.photo_url.clone(),
            member_count: g.members.len(),
        })
        .collect();

    let users = ctx
        .state
        .users
        .values()
        .filter(|u| &u.id != me)
        .filter_map(|u| {
            let name = u.resolved_name().unwrap_or_else(|| "User".to_string());
            let nickname = ctx.nickname_for(&u.id);
            let hit = matches(&name) || nickname.as_deref().is_some_and(matches);
            if !hit {
                return None;
            }
            let presence = presence_of(u, ctx.now, ctx.trust_window);
            Some(UserEntry {
                id: u.id.clone(),
                name,
                nickname,
                photo_url: u.photo_url.clone(),
                presence,
                presence_label: presence.label(ctx.now),
                blocked: ctx.me().is_some_and(|m| m.has_blocked(&u.id)),
            })
        })
        .collect();

    SidebarView { groups, users }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;
    use murmur_shared::{DeliveryState, Group, Record, SharedTheme};
    use serde_json::json;

    use super::*;
    use crate::session::AuthUser;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn user(id: &str, body: serde_json::Value) -> User {
        User::from_document(id, &body).unwrap()
    }

    fn msg(id: &str, sender: &str) -> Message {
        Message {
            id: MessageId::new(id),
            conversation_id: ConversationKey::from("A_B"),
            sender_id: UserId::new(sender),
            text: format!("{id} text"),
            created_at: Some(now() - Duration::minutes(10)),
            ..Default::default()
        }
    }

    fn direct(me: &str, other: &str) -> Arc<SessionContext> {
        SessionContext::new(AuthUser::new(me), now())
            .with_target(ConversationTarget::Direct(UserId::new(other)))
    }

    fn roster(users: Vec<User>) -> SyncState {
        SyncState {
            users: users.into_iter().map(|u| (u.id.clone(), u)).collect(),
            ..Default::default()
        }
    }

    fn ctx<'a>(session: &'a SessionContext, state: &'a SyncState) -> ViewContext<'a> {
        ViewContext {
            session,
            state,
            now: now(),
            trust_window: Duration::seconds(60),
        }
    }

    #[test]
    fn test_scheduled_hidden_from_recipient_only() {
        let mut scheduled = msg("s1", "A");
        scheduled.scheduled_at = Some(now() + Duration::hours(1));
        scheduled.status = DeliveryState::Scheduled;
        let mut state = roster(vec![]);
        state.messages = vec![msg("m1", "B"), scheduled];

        let author = direct("A", "B");
        let view = conversation_view(&ctx(&author, &state));
        assert_eq!(view.messages.len(), 2);
        assert_eq!(view.messages[1].scheduled_for, Some(now() + Duration::hours(1)));

        let recipient = direct("B", "A");
        let view = conversation_view(&ctx(&recipient, &state));
        let ids: Vec<&str> = view.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1"]);
    }

    #[test]
    fn test_seen_receipt_only_on_latest_own_message() {
        let mut first = msg("m1", "A");
        first.seen_by.insert(UserId::new("B"));
        let mut second = msg("m2", "A");
        second.seen_by.insert(UserId::new("B"));
        let mut state = roster(vec![]);
        state.messages = vec![first, second];

        let session = direct("A", "B");
        let view = conversation_view(&ctx(&session, &state));
        assert!(!view.messages[0].seen);
        assert!(view.messages[1].seen);

        // A reply after our message hides the receipt.
        state.messages.push(msg("m3", "B"));
        let view = conversation_view(&ctx(&session, &state));
        assert!(view.messages.iter().all(|m| !m.seen));
    }

    #[test]
    fn test_self_seen_is_not_a_receipt() {
        let mut own = msg("m1", "A");
        own.seen_by.insert(UserId::new("A"));
        let mut state = roster(vec![]);
        state.messages = vec![own];
        let session = direct("A", "B");
        assert!(!conversation_view(&ctx(&session, &state)).messages[0].seen);
    }

    #[test]
    fn test_sender_name_resolution() {
        let me = user("A", json!({ "settings": { "B": { "nickname": "Bee" } } }));
        let carol = user("C", json!({ "email": "carol@example.com" }));
        let mut state = roster(vec![me, carol]);
        let mut ghost = msg("m3", "D");
        ghost.sender_name = Some("Dana".into());
        state.messages = vec![msg("m1", "B"), msg("m2", "C"), ghost, msg("m4", "E")];

        let session = direct("A", "B");
        let names: Vec<String> = conversation_view(&ctx(&session, &state))
            .messages
            .into_iter()
            .map(|m| m.sender_name)
            .collect();
        assert_eq!(names, vec!["Bee", "carol", "Dana", "Unknown"]);
    }

    #[test]
    fn test_direct_header_theme_precedence() {
        let me = user(
            "A",
            json!({ "settings": { "B": { "nickname": "Bee", "themeColor": "#111", "wallpaper": "mine" } } }),
        );
        let bob = user(
            "B",
            json!({ "displayName": "Bob", "online": true, "lastSeen": (now() - Duration::seconds(90)).to_rfc3339() }),
        );
        let mut state = roster(vec![me, bob]);
        let session = direct("A", "B");

        let header = conversation_view(&ctx(&session, &state)).header;
        assert_eq!(header.title, "Bob");
        assert_eq!(header.nickname.as_deref(), Some("Bee"));
        assert_eq!(header.theme_color.as_deref(), Some("#111"));
        assert_eq!(header.subtitle, "Active 1m ago");

        state.shared_theme = Some(SharedTheme {
            theme_color: Some("#222".into()),
            ..Default::default()
        });
        let header = conversation_view(&ctx(&session, &state)).header;
        assert_eq!(header.theme_color.as_deref(), Some("#222"));
        assert_eq!(header.wallpaper.as_deref(), Some("mine"));
    }

    #[test]
    fn test_group_header() {
        let group = Group::from_document(
            "g1",
            &json!({ "name": "Crew", "createdBy": "A", "members": ["A", "B", "C"], "messageSize": 16 }),
        )
        .unwrap();
        let state = SyncState {
            groups: vec![group],
            ..Default::default()
        };
        let session = SessionContext::new(AuthUser::new("A"), now())
            .with_target(ConversationTarget::Group(GroupId::new("g1")));
        let header = conversation_view(&ctx(&session, &state)).header;
        assert_eq!(header.title, "Crew");
        assert_eq!(header.subtitle, "3 members");
        assert_eq!(header.message_size, 16);
        assert!(matches!(header.kind, HeaderKind::Group { is_creator: true, .. }));
    }

    #[test]
    fn test_sidebar_excludes_self_and_filters() {
        let me = user("A", json!({ "displayName": "Alice", "blockedUsers": ["C"], "settings": { "B": { "nickname": "Buddy" } } }));
        let bob = user("B", json!({ "displayName": "Bob" }));
        let carol = user("C", json!({ "displayName": "Carol" }));
        let mut state = roster(vec![me, bob, carol]);
        state.groups = vec![Group::from_document("g1", &json!({ "name": "Book club" })).unwrap()];
        let session = SessionContext::new(AuthUser::new("A"), now());

        let all = sidebar_view(&ctx(&session, &state), "");
        let ids: Vec<&str> = all.users.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["B", "C"]);
        assert!(all.users[1].blocked);
        assert_eq!(all.users[0].presence_label, "Offline");

        let found = sidebar_view(&ctx(&session, &state), "BUD");
        assert_eq!(found.users.len(), 1);
        assert_eq!(found.users[0].name, "Bob");
        assert!(found.groups.is_empty());

        let books = sidebar_view(&ctx(&session, &state), "book");
        assert_eq!(books.groups.len(), 1);
        assert!(books.users.is_empty());
    }
}
