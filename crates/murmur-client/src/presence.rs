//! Heartbeat-based presence.
//!
//! The tracker writes `{online, lastSeen}` onto the user's own document.
//! Readers never trust `online` alone: a flag whose heartbeat is older than
//! the trust window is treated as stale.

use chrono::{DateTime, Duration, Utc};
use murmur_shared::constants::COLLECTION_USERS;
use murmur_shared::{User, UserId};
use murmur_store::{DocPath, DocumentStore, Fields, StoreError, WriteMode};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Offline,
    Online,
}

/// Local belief about the signed-in user's own presence.
#[derive(Debug)]
pub struct PresenceTracker {
    state: PresenceState,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self {
            state: PresenceState::Offline,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    /// Announce the user as online. Runs at sign-in, on visibility regain and
    /// on every heartbeat. Failures are logged and otherwise ignored.
    pub async fn beat(&mut self, store: &dyn DocumentStore, user: &UserId) -> bool {
        match write_presence(store, user, true).await {
            Ok(()) => {
                self.state = PresenceState::Online;
                true
            }
            Err(e) => {
                log_presence_error(&e, user);
                false
            }
        }
    }

    /// Best-effort offline marker at sign-out or shutdown. The trust window
    /// covers the case where it never lands.
    pub async fn go_offline(&mut self, store: &dyn DocumentStore, user: &UserId) {
        if let Err(e) = write_presence(store, user, false).await {
            log_presence_error(&e, user);
        }
        self.state = PresenceState::Offline;
    }
}

async fn write_presence(store: &dyn DocumentStore, user: &UserId, online: bool) -> Result<(), StoreError> {
    let path = DocPath::new(COLLECTION_USERS, user.as_str());
    let fields = Fields::new()
        .set("online", online)
        .server_timestamp("lastSeen");
    store.write(&path, fields, WriteMode::Merge).await
}

fn log_presence_error(e: &StoreError, user: &UserId) {
    // Permission denials are routine while auth state settles.
    if e.is_permission_denied() {
        debug!(user = %user.short(), error = %e, "Presence write refused");
    } else {
        warn!(user = %user.short(), error = %e, "Presence write failed");
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "at", rename_all = "camelCase")]
pub enum Presence {
    ActiveNow,
    LastSeen(DateTime<Utc>),
    Unknown,
}

/// How `user` appears to others at `now`.
pub fn presence_of(user: &User, now: DateTime<Utc>, trust_window: Duration) -> Presence {
    match user.last_seen {
        Some(seen) if user.online && now.signed_duration_since(seen) < trust_window => {
            Presence::ActiveNow
        }
        Some(seen) => Presence::LastSeen(seen),
        None => Presence::Unknown,
    }
}

impl Presence {
    pub fn label(&self, now: DateTime<Utc>) -> String {
        match self {
            Self::ActiveNow => "Active now".to_string(),
            Self::LastSeen(at) => format!("Active {}", relative_time(*at, now)),
            Self::Unknown => "Offline".to_string(),
        }
    }
}

/// Coarse "time ago" label.
pub fn relative_time(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = now.signed_duration_since(at).num_seconds();
    if secs < 60 {
        "Just now".to_string()
    } else if secs < 3_600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3_600)
    } else {
        at.format("%-m/%-d/%Y").to_string()
    }
}
