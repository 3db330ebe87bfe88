//! The sync engine.
//!
//! [`ChatClient`] is the single owner of the session, the local state
//! slices and every subscription. All changes go through its methods, which
//! the UI drives either directly or by sending [`Intent`]s to [`ChatClient::run`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use murmur_shared::{
    Clock, ConversationTarget, GroupId, MessageId, NotificationPermission, UserId, Visibility,
};
use murmur_store::DocumentStore;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::events::{emit_event, ClientEvent, EventSender};
use crate::media::MediaUploader;
use crate::messaging::{GroupUpdate, Messenger, OutgoingMessage, ProfileUpdate};
use crate::mutations::{ContactSettingsUpdate, MutationOps, ThemeUpdate};
use crate::notifications::{NotificationRouter, RouteContext};
use crate::presence::{PresenceState, PresenceTracker};
use crate::seen::SeenTracker;
use crate::session::{AuthUser, SessionContext};
use crate::state::SyncState;
use crate::subscriptions::{
    feed_query, groups_query, messages_query, roster_query, shared_theme_query, Delivery, Slot,
    SubscriptionManager,
};
use crate::view::{self, ConversationView, SidebarView, ViewContext};

/// Capacity of the intent channel returned by [`ChatClient::spawn`].
pub const INTENT_CHANNEL_CAPACITY: usize = 256;

/// How often [`ChatClient::settle`] yields before checking for deliveries.
const SETTLE_YIELDS: usize = 8;

/// A user action for the client loop.
#[derive(Debug)]
pub enum Intent {
    SignIn(AuthUser),
    SignOut,
    Select(ConversationTarget),
    SetVisibility(Visibility),
    SetNotificationPermission(NotificationPermission),
    Send(OutgoingMessage),
    Edit { message: MessageId, text: String },
    Delete(MessageId),
    ClearConversation,
    CreateGroup { name: String, members: Vec<UserId> },
    UpdateGroup { group: GroupId, update: GroupUpdate },
    KickMember { group: GroupId, member: UserId },
    LeaveGroup(GroupId),
    ToggleReaction { message: MessageId, emoji: String },
    ToggleBlock(UserId),
    SetSharedTheme(ThemeUpdate),
    UpdateContactSettings { contact: UserId, update: ContactSettingsUpdate },
    UpdateProfile(ProfileUpdate),
    Shutdown,
}

impl Intent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SignIn(_) => "sign-in",
            Self::SignOut => "sign-out",
            Self::Select(_) => "select",
            Self::SetVisibility(_) => "set-visibility",
            Self::SetNotificationPermission(_) => "set-notification-permission",
            Self::Send(_) => "send",
            Self::Edit { .. } => "edit",
            Self::Delete(_) => "delete",
            Self::ClearConversation => "clear-conversation",
            Self::CreateGroup { .. } => "create-group",
            Self::UpdateGroup { .. } => "update-group",
            Self::KickMember { .. } => "kick-member",
            Self::LeaveGroup(_) => "leave-group",
            Self::ToggleReaction { .. } => "toggle-reaction",
            Self::ToggleBlock(_) => "toggle-block",
            Self::SetSharedTheme(_) => "set-shared-theme",
            Self::UpdateContactSettings { .. } => "update-contact-settings",
            Self::UpdateProfile(_) => "update-profile",
            Self::Shutdown => "shutdown",
        }
    }
}

pub struct ChatClient {
    config: ClientConfig,
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    session: Option<Arc<SessionContext>>,
    state: SyncState,
    subscriptions: SubscriptionManager,
    deliveries: mpsc::UnboundedReceiver<Delivery>,
    presence: PresenceTracker,
    router: NotificationRouter,
    seen: SeenTracker,
    mutations: MutationOps,
    messenger: Messenger,
    visibility: Visibility,
    permission: NotificationPermission,
    last_tick: Option<DateTime<Utc>>,
    events: EventSender,
}

impl ChatClient {
    /// Build a signed-out client. The receiver yields every [`ClientEvent`].
    pub fn new(
        config: ClientConfig,
        store: Arc<dyn DocumentStore>,
        uploader: Arc<dyn MediaUploader>,
        clock: Arc<dyn Clock>,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (subscriptions, deliveries) = SubscriptionManager::new(store.clone());
        let client = Self {
            router: NotificationRouter::new(&config),
            seen: SeenTracker::new(config.seen_window),
            mutations: MutationOps::new(store.clone()),
            messenger: Messenger::new(store.clone(), uploader, clock.clone()),
            presence: PresenceTracker::new(),
            session: None,
            state: SyncState::default(),
            subscriptions,
            deliveries,
            visibility: Visibility::Visible,
            permission: NotificationPermission::Default,
            last_tick: None,
            events,
            config,
            store,
            clock,
        };
        (client, events_rx)
    }

    pub fn session(&self) -> Option<&Arc<SessionContext>> {
        self.session.as_ref()
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn presence_state(&self) -> PresenceState {
        self.presence.state()
    }

    pub fn router(&self) -> &NotificationRouter {
        &self.router
    }

    fn current(&self) -> Result<Arc<SessionContext>> {
        self.session.clone().ok_or(ClientError::NotSignedIn)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn emit(&self, event: ClientEvent) {
        emit_event(&self.events, event);
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Start a session for `user` with nothing selected.
    pub async fn sign_in(&mut self, user: AuthUser) {
        if self.session.is_some() {
            self.sign_out().await;
        }
        let now = self.now();
        let session = SessionContext::new(user, now);
        let me = session.self_id().clone();
        info!(user = %me.short(), "Signed in");

        if let Err(e) = self.messenger.sync_profile(&session).await {
            warn!(user = %me.short(), error = %e, "Failed to sync profile");
        }
        self.attach(Slot::Roster, roster_query()).await;
        self.attach(Slot::Groups, groups_query(&me)).await;
        self.attach(Slot::Feed, feed_query(self.config.feed_limit)).await;
        self.attach(Slot::Messages, messages_query(&session.key)).await;
        self.session = Some(session);
        self.last_tick = Some(now);

        self.presence.beat(self.store.as_ref(), &me).await;
        self.emit(ClientEvent::SignedIn { user_id: me });
    }

    /// End the session. Subscriptions are released before the slices are
    /// cleared, so no late snapshot can repopulate them.
    pub async fn sign_out(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.presence
            .go_offline(self.store.as_ref(), session.self_id())
            .await;
        self.subscriptions.cancel_all().await;
        self.state = SyncState::default();
        self.router.reset();
        self.seen.reset();
        self.last_tick = None;
        info!(user = %session.self_id().short(), "Signed out");
        self.emit(ClientEvent::SignedOut);
    }

    /// Open `target`. The previous conversation's messages and theme are
    /// dropped immediately and its subscriptions replaced.
    pub async fn select(&mut self, target: ConversationTarget) -> Result<()> {
        let session = self.current()?;
        if session.target == target {
            return Ok(());
        }
        let next = session.with_target(target);

        self.state.clear_conversation();
        self.seen.reset();
        self.attach(Slot::Messages, messages_query(&next.key)).await;
        if next.target.has_shared_theme() {
            self.attach(Slot::SharedTheme, shared_theme_query(&next.key))
                .await;
        } else {
            self.subscriptions.cancel(Slot::SharedTheme).await;
        }
        info!(conversation = %next.key, "Conversation selected");

        let conversation = next.key.clone();
        self.session = Some(next);
        self.emit(ClientEvent::SelectionChanged { conversation });
        self.emit(ClientEvent::ConversationUpdated);
        Ok(())
    }

    /// Subscribe `slot`, keeping the slot empty if the store refuses.
    async fn attach(&mut self, slot: Slot, query: murmur_store::Query) {
        if let Err(e) = self.subscriptions.replace(slot, query).await {
            warn!(?slot, error = %e, "Failed to subscribe");
        }
    }

    pub async fn set_visibility(&mut self, visibility: Visibility) {
        let regained = self.visibility == Visibility::Hidden && visibility == Visibility::Visible;
        self.visibility = visibility;
        debug!(?visibility, "Visibility changed");
        if regained {
            self.heartbeat().await;
            self.mark_seen().await;
        }
    }

    pub fn set_notification_permission(&mut self, permission: NotificationPermission) {
        self.permission = permission;
    }

    // -----------------------------------------------------------------------
    // Deliveries and timers
    // -----------------------------------------------------------------------

    /// Apply one subscription delivery. Stale deliveries are dropped, and a
    /// failed subscription leaves its slice as it was.
    pub async fn handle_delivery(&mut self, delivery: Delivery) {
        let Delivery {
            slot,
            generation,
            result,
        } = delivery;
        if !self.subscriptions.is_current(slot, generation) {
            debug!(?slot, generation, "Dropping stale delivery");
            return;
        }
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(?slot, error = %e, "Subscription failed, keeping last known state");
                return;
            }
        };
        let Some(session) = self.session.clone() else {
            return;
        };

        self.state.apply(slot, &snapshot);
        match slot {
            Slot::Feed => {
                let ctx = RouteContext {
                    session: &session,
                    users: &self.state.users,
                    visibility: self.visibility,
                    permission: self.permission,
                    now: self.clock.now(),
                };
                for event in self.router.route(&snapshot, &ctx) {
                    emit_event(&self.events, event);
                }
            }
            Slot::Messages => {
                self.mark_seen().await;
                self.emit(ClientEvent::ConversationUpdated);
            }
            Slot::SharedTheme => self.emit(ClientEvent::ConversationUpdated),
            Slot::Roster | Slot::Groups => self.emit(ClientEvent::SidebarUpdated),
        }
    }

    /// Mark the open conversation seen, if the user can see it.
    async fn mark_seen(&mut self) {
        if self.visibility != Visibility::Visible {
            return;
        }
        let Some(session) = self.session.clone() else {
            return;
        };
        let now = self.now();
        let issued = self
            .seen
            .mark_seen(self.store.as_ref(), &self.state.messages, session.self_id(), now)
            .await;
        if issued > 0 {
            debug!(conversation = %session.key, issued, "Marked messages seen");
        }
    }

    /// Clock tick: expire the toast, release due scheduled messages, and
    /// refresh the conversation when one of its messages became due.
    pub async fn tick(&mut self) {
        let Some(session) = self.session.clone() else {
            return;
        };
        let now = self.now();
        let ctx = RouteContext {
            session: &session,
            users: &self.state.users,
            visibility: self.visibility,
            permission: self.permission,
            now,
        };
        for event in self.router.tick(&ctx) {
            emit_event(&self.events, event);
        }

        let since = self.last_tick.replace(now).unwrap_or(now);
        let released = self
            .state
            .messages
            .iter()
            .any(|m| m.scheduled_at.is_some_and(|at| at > since && at <= now));
        if released {
            self.mark_seen().await;
            self.emit(ClientEvent::ConversationUpdated);
        }
    }

    pub async fn heartbeat(&mut self) {
        let Some(session) = self.session.clone() else {
            return;
        };
        self.presence.beat(self.store.as_ref(), session.self_id()).await;
    }

    /// Process every delivery the store has produced so far, including the
    /// ones caused by processing.
    pub async fn settle(&mut self) {
        loop {
            for _ in 0..SETTLE_YIELDS {
                tokio::task::yield_now().await;
            }
            let mut handled = false;
            while let Ok(delivery) = self.deliveries.try_recv() {
                self.handle_delivery(delivery).await;
                handled = true;
            }
            if !handled {
                break;
            }
        }
    }

    // -----------------------------------------------------------------------
    // User actions
    // -----------------------------------------------------------------------

    pub async fn send(&mut self, outgoing: OutgoingMessage) -> Result<MessageId> {
        let session = self.current()?;
        self.messenger.send(&session, &self.state, outgoing).await
    }

    pub async fn edit(&mut self, message: &MessageId, text: &str) -> Result<()> {
        let session = self.current()?;
        self.messenger.edit(&session, message, text).await
    }

    pub async fn delete(&mut self, message: &MessageId) -> Result<()> {
        let session = self.current()?;
        self.messenger.delete(&session, message).await
    }

    pub async fn clear_conversation(&mut self) -> Result<usize> {
        let session = self.current()?;
        self.messenger.clear_conversation(&session, &self.state).await
    }

    /// Create a group and open it.
    pub async fn create_group(&mut self, name: &str, members: &[UserId]) -> Result<GroupId> {
        let session = self.current()?;
        let id = self.messenger.create_group(&session, name, members).await?;
        self.select(ConversationTarget::Group(id.clone())).await?;
        Ok(id)
    }

    pub async fn update_group(&mut self, group: &GroupId, update: GroupUpdate) -> Result<()> {
        let session = self.current()?;
        self.messenger
            .update_group(&session, &self.state, group, update)
            .await
    }

    pub async fn kick_member(&mut self, group: &GroupId, member: &UserId) -> Result<()> {
        let session = self.current()?;
        let group = self
            .state
            .group(group)
            .ok_or_else(|| ClientError::NotFound(format!("group {group}")))?;
        self.mutations
            .kick_member(group, session.self_id(), member)
            .await
    }

    /// Leave a group; if it is open, fall back to the default channel.
    pub async fn leave_group(&mut self, group: &GroupId) -> Result<()> {
        let session = self.current()?;
        self.mutations.leave_group(group, session.self_id()).await?;
        if session.target == ConversationTarget::Group(group.clone()) {
            self.select(ConversationTarget::None).await?;
        }
        Ok(())
    }

    pub async fn toggle_reaction(&mut self, message: &MessageId, emoji: &str) -> Result<bool> {
        let session = self.current()?;
        self.mutations
            .toggle_reaction(message, emoji, session.self_id())
            .await
    }

    pub async fn block(&mut self, other: &UserId) -> Result<()> {
        let session = self.current()?;
        self.mutations.set_blocked(session.self_id(), other, true).await
    }

    pub async fn unblock(&mut self, other: &UserId) -> Result<()> {
        let session = self.current()?;
        self.mutations.set_blocked(session.self_id(), other, false).await
    }

    pub async fn toggle_block(&mut self, other: &UserId) -> Result<bool> {
        let session = self.current()?;
        self.mutations.toggle_block(session.self_id(), other).await
    }

    /// Change the look of the open direct chat or group for every participant.
    pub async fn set_shared_theme(&mut self, update: ThemeUpdate) -> Result<()> {
        let session = self.current()?;
        if !session.target.has_shared_theme() {
            return Err(ClientError::InvalidInput(format!(
                "{} has no shared theme",
                session.key
            )));
        }
        self.mutations.set_shared_theme(&session.key, &update).await
    }

    pub async fn update_contact_settings(
        &mut self,
        contact: &UserId,
        update: ContactSettingsUpdate,
    ) -> Result<()> {
        let session = self.current()?;
        self.mutations
            .update_contact_settings(session.self_id(), contact, &update)
            .await
    }

    pub async fn update_profile(&mut self, update: ProfileUpdate) -> Result<()> {
        let session = self.current()?;
        self.messenger.update_profile(&session, update).await
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    fn view_context(&self) -> Option<ViewContext<'_>> {
        let session = self.session.as_deref()?;
        Some(ViewContext {
            session,
            state: &self.state,
            now: self.now(),
            trust_window: self.config.trust_window(),
        })
    }

    pub fn conversation_view(&self) -> Option<ConversationView> {
        self.view_context().map(|ctx| view::conversation_view(&ctx))
    }

    pub fn sidebar_view(&self, search: &str) -> Option<SidebarView> {
        self.view_context().map(|ctx| view::sidebar_view(&ctx, search))
    }

    // -----------------------------------------------------------------------
    // Event loop
    // -----------------------------------------------------------------------

    /// Move the client onto its own task. Returns the intent sender and the
    /// task handle.
    pub fn spawn(self) -> (mpsc::Sender<Intent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(INTENT_CHANNEL_CAPACITY);
        let handle = tokio::spawn(self.run(rx));
        (tx, handle)
    }

    /// Drive the client until [`Intent::Shutdown`] arrives or every intent
    /// sender is dropped. The session is signed out on the way out.
    pub async fn run(mut self, mut intents: mpsc::Receiver<Intent>) {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(delivery) = self.deliveries.recv() => {
                    self.handle_delivery(delivery).await;
                }
                _ = heartbeat.tick() => self.heartbeat().await,
                _ = tick.tick() => self.tick().await,
                intent = intents.recv() => match intent {
                    Some(Intent::Shutdown) => {
                        info!("Client shutdown requested");
                        break;
                    }
                    Some(intent) => self.dispatch(intent).await,
                    None => {
                        info!("Intent channel closed, shutting down client");
                        break;
                    }
                },
            }
        }
        self.sign_out().await;
    }

    async fn dispatch(&mut self, intent: Intent) {
        let action = intent.name();
        let result = match intent {
            Intent::SignIn(user) => {
                self.sign_in(user).await;
                Ok(())
            }
            Intent::SignOut => {
                self.sign_out().await;
                Ok(())
            }
            Intent::Select(target) => self.select(target).await,
            Intent::SetVisibility(visibility) => {
                self.set_visibility(visibility).await;
                Ok(())
            }
            Intent::SetNotificationPermission(permission) => {
                self.set_notification_permission(permission);
                Ok(())
            }
            Intent::Send(outgoing) => self.send(outgoing).await.map(|_| ()),
            Intent::Edit { message, text } => self.edit(&message, &text).await,
            Intent::Delete(message) => self.delete(&message).await,
            Intent::ClearConversation => self.clear_conversation().await.map(|_| ()),
            Intent::CreateGroup { name, members } => {
                self.create_group(&name, &members).await.map(|_| ())
            }
            Intent::UpdateGroup { group, update } => self.update_group(&group, update).await,
            Intent::KickMember { group, member } => self.kick_member(&group, &member).await,
            Intent::LeaveGroup(group) => self.leave_group(&group).await,
            Intent::ToggleReaction { message, emoji } => {
                self.toggle_reaction(&message, &emoji).await.map(|_| ())
            }
            Intent::ToggleBlock(other) => self.toggle_block(&other).await.map(|_| ()),
            Intent::SetSharedTheme(update) => self.set_shared_theme(update).await,
            Intent::UpdateContactSettings { contact, update } => {
                self.update_contact_settings(&contact, update).await
            }
            Intent::UpdateProfile(update) => self.update_profile(update).await,
            Intent::Shutdown => Ok(()),
        };
        if let Err(e) = result {
            warn!(action, error = %e, "Action failed");
            self.emit(ClientEvent::ActionFailed {
                action: action.to_string(),
                message: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use murmur_shared::constants::{COLLECTION_MESSAGES, COLLECTION_USERS};
    use murmur_shared::ManualClock;
    use murmur_store::{DocPath, MemoryStore, Snapshot};
    use serde_json::json;

    use super::*;
    use crate::media::MemoryUploader;

    struct World {
        store: Arc<MemoryStore>,
        clock: ManualClock,
    }

    impl World {
        fn new() -> Self {
            let clock = ManualClock::new(Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap());
            let store = Arc::new(MemoryStore::new(Arc::new(clock.clone())));
            Self { store, clock }
        }

        async fn client(&self, id: &str, name: &str) -> (ChatClient, mpsc::UnboundedReceiver<ClientEvent>) {
            let (mut client, events) = ChatClient::new(
                ClientConfig::default(),
                self.store.clone(),
                Arc::new(MemoryUploader::new()),
                Arc::new(self.clock.clone()),
            );
            client
                .sign_in(AuthUser::new(id).with_display_name(name))
                .await;
            client.settle().await;
            (client, events)
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn direct(id: &str) -> ConversationTarget {
        ConversationTarget::Direct(UserId::new(id))
    }

    #[tokio::test]
    async fn test_sign_in_subscribes_and_announces_presence() {
        let world = World::new();
        let (alice, mut events) = world.client("A", "Alice").await;

        let body = world.store.document(&DocPath::new(COLLECTION_USERS, "A")).unwrap();
        assert_eq!(body["online"], json!(true));
        assert!(alice.state().user(&UserId::new("A")).is_some());
        assert_eq!(alice.presence_state(), PresenceState::Online);
        assert_eq!(world.store.listener_count(), 4);
        assert!(drain(&mut events).contains(&ClientEvent::SignedIn {
            user_id: UserId::new("A")
        }));
    }

    #[tokio::test]
    async fn test_direct_chat_round_trip_with_receipt() {
        let world = World::new();
        let (mut alice, _) = world.client("A", "Alice").await;
        let (mut bob, _) = world.client("B", "Bob").await;
        alice.select(direct("B")).await.unwrap();
        bob.select(direct("A")).await.unwrap();
        assert_eq!(alice.session().unwrap().key, bob.session().unwrap().key);

        alice.send(OutgoingMessage::text("hi bob")).await.unwrap();
        alice.settle().await;
        bob.settle().await;

        let seen_by_bob = bob.conversation_view().unwrap();
        assert_eq!(seen_by_bob.messages.len(), 1);
        assert_eq!(seen_by_bob.messages[0].sender_name, "Alice");
        assert_eq!(seen_by_bob.header.title, "Alice");

        alice.settle().await;
        let view = alice.conversation_view().unwrap();
        assert!(view.messages[0].is_mine);
        assert!(view.messages[0].seen);
    }

    #[tokio::test]
    async fn test_notification_when_conversation_not_open() {
        let world = World::new();
        let (mut alice, _) = world.client("A", "Alice").await;
        let (mut bob, mut bob_events) = world.client("B", "Bob").await;
        bob.set_visibility(Visibility::Hidden).await;
        bob.set_notification_permission(NotificationPermission::Granted);
        drain(&mut bob_events);

        alice.select(direct("B")).await.unwrap();
        alice.send(OutgoingMessage::text("ping")).await.unwrap();
        bob.settle().await;

        let events = drain(&mut bob_events);
        let toasts: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                ClientEvent::Toast(t) => Some(t),
                _ => None,
            })
            .collect();
        assert_eq!(toasts.len(), 1);
        assert_eq!(toasts[0].sender_name, "Alice");
        assert_eq!(toasts[0].body, "ping");
        assert!(events
            .iter()
            .any(|e| matches!(e, ClientEvent::PlatformNotification(n) if n.tag == "A")));

        // Later feed snapshots never re-alert the same message.
        alice.send(OutgoingMessage::text("again")).await.unwrap();
        bob.settle().await;
        let bodies: Vec<String> = drain(&mut bob_events)
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::Toast(t) => Some(t.body),
                _ => None,
            })
            .collect();
        assert_eq!(bodies, vec!["again".to_string()]);
    }

    #[tokio::test]
    async fn test_open_visible_conversation_does_not_alert() {
        let world = World::new();
        let (mut alice, _) = world.client("A", "Alice").await;
        let (mut bob, mut bob_events) = world.client("B", "Bob").await;
        bob.select(direct("A")).await.unwrap();
        bob.settle().await;
        drain(&mut bob_events);

        alice.select(direct("B")).await.unwrap();
        alice.send(OutgoingMessage::text("hello")).await.unwrap();
        bob.settle().await;

        let events = drain(&mut bob_events);
        assert!(!events.iter().any(|e| matches!(e, ClientEvent::Toast(_))));
        assert!(events.contains(&ClientEvent::ConversationUpdated));
    }

    #[tokio::test]
    async fn test_stale_delivery_never_alters_messages() {
        let world = World::new();
        world.store.insert_raw(
            COLLECTION_MESSAGES,
            "ab",
            json!({ "conversationId": "A_B", "senderId": "B", "text": "from b", "createdAt": "2026-06-01T11:00:00Z" }),
        );
        world.store.insert_raw(
            COLLECTION_MESSAGES,
            "ac",
            json!({ "conversationId": "A_C", "senderId": "C", "text": "from c", "createdAt": "2026-06-01T11:00:00Z" }),
        );
        let (mut alice, _) = world.client("A", "Alice").await;

        // Switch twice without letting the first subscription deliver.
        alice.select(direct("B")).await.unwrap();
        let stale = alice.subscriptions.current_generation(Slot::Messages);
        alice.select(direct("C")).await.unwrap();
        alice.settle().await;

        let ids: Vec<&str> = alice.state().messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["ac"]);

        let old = world.store.documents(COLLECTION_MESSAGES);
        alice
            .handle_delivery(Delivery {
                slot: Slot::Messages,
                generation: stale,
                result: Ok(Snapshot {
                    docs: old,
                    changes: Vec::new(),
                }),
            })
            .await;
        let ids: Vec<&str> = alice.state().messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["ac"]);
    }

    #[tokio::test]
    async fn test_subscription_error_keeps_last_slice() {
        let world = World::new();
        world.store.insert_raw(
            COLLECTION_MESSAGES,
            "m1",
            json!({ "conversationId": "A_B", "senderId": "B", "text": "hey", "createdAt": "2026-06-01T11:00:00Z" }),
        );
        let (mut alice, _) = world.client("A", "Alice").await;
        alice.select(direct("B")).await.unwrap();
        alice.settle().await;
        assert_eq!(alice.state().messages.len(), 1);

        world.store.fail_subscriptions(COLLECTION_MESSAGES);
        alice.settle().await;
        assert_eq!(alice.state().messages.len(), 1);
        assert_eq!(alice.conversation_view().unwrap().messages[0].text, "hey");
    }

    #[tokio::test]
    async fn test_scheduled_message_alerts_when_due() {
        let world = World::new();
        let (mut alice, _) = world.client("A", "Alice").await;
        let (mut bob, mut bob_events) = world.client("B", "Bob").await;
        bob.set_visibility(Visibility::Hidden).await;
        drain(&mut bob_events);

        alice.select(direct("B")).await.unwrap();
        let due = world.clock.now() + Duration::minutes(1);
        alice
            .send(OutgoingMessage::text("later").scheduled_for(due))
            .await
            .unwrap();
        bob.settle().await;
        bob.tick().await;
        assert!(!drain(&mut bob_events).iter().any(|e| matches!(e, ClientEvent::Toast(_))));
        assert_eq!(bob.router().parked_count(), 1);

        world.clock.advance(Duration::seconds(61));
        bob.tick().await;
        let events = drain(&mut bob_events);
        assert!(events
            .iter()
            .any(|e| matches!(e, ClientEvent::Toast(t) if t.body == "later")));
        assert_eq!(bob.router().parked_count(), 0);
    }

    #[tokio::test]
    async fn test_toast_expires_on_tick() {
        let world = World::new();
        let (mut alice, _) = world.client("A", "Alice").await;
        let (mut bob, mut bob_events) = world.client("B", "Bob").await;
        alice.select(direct("B")).await.unwrap();
        let id = alice.send(OutgoingMessage::text("yo")).await.unwrap();
        bob.settle().await;
        assert!(bob.router().active_toast().is_some());

        world.clock.advance(Duration::seconds(6));
        bob.tick().await;
        assert!(bob.router().active_toast().is_none());
        assert!(drain(&mut bob_events).contains(&ClientEvent::ToastDismissed { message_id: id }));
    }

    #[tokio::test]
    async fn test_regaining_visibility_marks_seen() {
        let world = World::new();
        let (mut alice, _) = world.client("A", "Alice").await;
        let (mut bob, _) = world.client("B", "Bob").await;
        bob.select(direct("A")).await.unwrap();
        bob.set_visibility(Visibility::Hidden).await;

        alice.select(direct("B")).await.unwrap();
        let id = alice.send(OutgoingMessage::text("read me")).await.unwrap();
        bob.settle().await;
        let path = DocPath::new(COLLECTION_MESSAGES, id.as_str());
        assert_eq!(world.store.document(&path).unwrap()["seenBy"], json!([]));

        bob.set_visibility(Visibility::Visible).await;
        assert_eq!(world.store.document(&path).unwrap()["seenBy"], json!(["B"]));
    }

    #[tokio::test]
    async fn test_blocked_sender_cannot_send() {
        let world = World::new();
        let (mut alice, _) = world.client("A", "Alice").await;
        let (mut bob, _) = world.client("B", "Bob").await;
        bob.block(&UserId::new("A")).await.unwrap();
        alice.settle().await;

        alice.select(direct("B")).await.unwrap();
        let err = alice.send(OutgoingMessage::text("hi")).await.unwrap_err();
        assert!(matches!(err, ClientError::BlockedByRecipient));

        bob.settle().await;
        let sidebar = bob.sidebar_view("").unwrap();
        assert!(sidebar.users.iter().any(|u| u.id == UserId::new("A") && u.blocked));
    }

    #[tokio::test]
    async fn test_group_lifecycle() {
        let world = World::new();
        let (mut alice, _) = world.client("A", "Alice").await;
        let (mut bob, _) = world.client("B", "Bob").await;

        let group = alice.create_group("Crew", &[UserId::new("B")]).await.unwrap();
        alice.settle().await;
        bob.settle().await;
        assert_eq!(
            alice.session().unwrap().target,
            ConversationTarget::Group(group.clone())
        );
        assert!(bob.state().group(&group).is_some());

        let err = bob.kick_member(&group, &UserId::new("A")).await.unwrap_err();
        assert!(matches!(err, ClientError::NotPermitted(_)));

        bob.select(ConversationTarget::Group(group.clone())).await.unwrap();
        bob.leave_group(&group).await.unwrap();
        bob.settle().await;
        assert_eq!(bob.session().unwrap().target, ConversationTarget::None);
        assert!(bob.state().group(&group).is_none());
    }

    #[tokio::test]
    async fn test_shared_theme_needs_direct_or_group() {
        let world = World::new();
        let (mut alice, _) = world.client("A", "Alice").await;
        let (mut bob, _) = world.client("B", "Bob").await;
        let update = ThemeUpdate {
            theme_color: Some("#f0a".into()),
            ..Default::default()
        };
        let err = alice.set_shared_theme(update.clone()).await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidInput(_)));

        alice.select(direct("B")).await.unwrap();
        bob.select(direct("A")).await.unwrap();
        alice.set_shared_theme(update).await.unwrap();
        bob.settle().await;
        let header = bob.conversation_view().unwrap().header;
        assert_eq!(header.theme_color.as_deref(), Some("#f0a"));

        // Leaving the chat drops the theme with it.
        bob.select(ConversationTarget::None).await.unwrap();
        bob.settle().await;
        assert!(bob.state().shared_theme.is_none());
    }

    #[tokio::test]
    async fn test_sign_out_releases_everything() {
        let world = World::new();
        let (mut alice, mut events) = world.client("A", "Alice").await;
        alice.sign_out().await;

        assert!(alice.session().is_none());
        assert_eq!(world.store.listener_count(), 0);
        assert!(alice.state().users.is_empty());
        let body = world.store.document(&DocPath::new(COLLECTION_USERS, "A")).unwrap();
        assert_eq!(body["online"], json!(false));
        assert!(drain(&mut events).contains(&ClientEvent::SignedOut));

        let err = alice.send(OutgoingMessage::text("x")).await.unwrap_err();
        assert!(matches!(err, ClientError::NotSignedIn));
    }

    #[tokio::test]
    async fn test_run_loop_processes_intents() {
        let world = World::new();
        let (client, mut events) = ChatClient::new(
            ClientConfig::default(),
            world.store.clone(),
            Arc::new(MemoryUploader::new()),
            Arc::new(world.clock.clone()),
        );
        let (intents, handle) = client.spawn();

        intents.send(Intent::SignIn(AuthUser::new("A"))).await.unwrap();
        intents.send(Intent::Select(direct("B"))).await.unwrap();
        intents
            .send(Intent::Send(OutgoingMessage::text("from the loop")))
            .await
            .unwrap();
        intents.send(Intent::Send(OutgoingMessage::text("   "))).await.unwrap();
        intents.send(Intent::Shutdown).await.unwrap();
        handle.await.unwrap();

        let messages = world.store.documents(COLLECTION_MESSAGES);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].data["conversationId"], "A_B");

        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(
            e,
            ClientEvent::ActionFailed { action, .. } if action == "send"
        )));
        assert_eq!(events.last(), Some(&ClientEvent::SignedOut));
    }
}
