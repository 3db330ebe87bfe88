use murmur_shared::{ConversationKey, MessageId, UserId};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::notifications::{PlatformNotification, Toast};

pub const EVENT_SIGNED_IN: &str = "signed-in";
pub const EVENT_SIGNED_OUT: &str = "signed-out";
pub const EVENT_SELECTION_CHANGED: &str = "selection-changed";
pub const EVENT_CONVERSATION_UPDATED: &str = "conversation-updated";
pub const EVENT_SIDEBAR_UPDATED: &str = "sidebar-updated";
pub const EVENT_TOAST: &str = "toast";
pub const EVENT_TOAST_DISMISSED: &str = "toast-dismissed";
pub const EVENT_PLATFORM_NOTIFICATION: &str = "platform-notification";
pub const EVENT_ACTION_FAILED: &str = "action-failed";

/// Everything the engine tells the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum ClientEvent {
    SignedIn { user_id: UserId },
    SignedOut,
    SelectionChanged { conversation: ConversationKey },
    /// Messages or the shared theme of the open conversation changed.
    ConversationUpdated,
    /// Roster or group list changed.
    SidebarUpdated,
    Toast(Toast),
    ToastDismissed { message_id: MessageId },
    PlatformNotification(PlatformNotification),
    /// A user intent failed; `action` names the intent.
    ActionFailed { action: String, message: String },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SignedIn { .. } => EVENT_SIGNED_IN,
            Self::SignedOut => EVENT_SIGNED_OUT,
            Self::SelectionChanged { .. } => EVENT_SELECTION_CHANGED,
            Self::ConversationUpdated => EVENT_CONVERSATION_UPDATED,
            Self::SidebarUpdated => EVENT_SIDEBAR_UPDATED,
            Self::Toast(_) => EVENT_TOAST,
            Self::ToastDismissed { .. } => EVENT_TOAST_DISMISSED,
            Self::PlatformNotification(_) => EVENT_PLATFORM_NOTIFICATION,
            Self::ActionFailed { .. } => EVENT_ACTION_FAILED,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<ClientEvent>;

pub fn emit_event(tx: &EventSender, event: ClientEvent) {
    let name = event.name();
    if let Err(e) = tx.send(event) {
        tracing::error!(event = name, error = %e, "Failed to emit event");
    }
}
