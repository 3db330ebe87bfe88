//! Session-wide context.
//!
//! A [`SessionContext`] is immutable. Signing in creates one, and every
//! selection change produces a new one; holders keep an `Arc` to whichever
//! context was current when they started.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use murmur_shared::{identity_for, ConversationKey, ConversationTarget, User, UserId};
use serde::{Deserialize, Serialize};

/// The signed-in principal as reported by the authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: UserId,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub photo_url: Option<String>,
}

impl AuthUser {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: UserId::new(id),
            display_name: None,
            email: None,
            photo_url: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionContext {
    pub user: AuthUser,
    /// When this sign-in happened; older messages never notify.
    pub started_at: DateTime<Utc>,
    pub target: ConversationTarget,
    /// Derived from `target`; never set independently.
    pub key: ConversationKey,
}

impl SessionContext {
    pub fn new(user: AuthUser, started_at: DateTime<Utc>) -> Arc<Self> {
        let target = ConversationTarget::None;
        let key = identity_for(&user.id, &target);
        Arc::new(Self {
            user,
            started_at,
            target,
            key,
        })
    }

    pub fn self_id(&self) -> &UserId {
        &self.user.id
    }

    /// A new context looking at `target`.
    pub fn with_target(&self, target: ConversationTarget) -> Arc<Self> {
        let key = identity_for(&self.user.id, &target);
        Arc::new(Self {
            user: self.user.clone(),
            started_at: self.started_at,
            target,
            key,
        })
    }

    /// The name the user goes by, preferring their roster profile.
    pub fn display_name(&self, profile: Option<&User>) -> String {
        profile
            .and_then(User::resolved_name)
            .or_else(|| self.user.display_name.clone())
            .or_else(|| {
                self.user
                    .email
                    .as_ref()
                    .and_then(|e| e.split('@').next())
                    .map(str::to_string)
            })
            .unwrap_or_else(|| "User".to_string())
    }

    pub fn photo_url(&self, profile: Option<&User>) -> Option<String> {
        profile
            .and_then(|p| p.photo_url.clone())
            .or_else(|| self.user.photo_url.clone())
    }
}

#[cfg(test)]
mod tests {
    use murmur_shared::GroupId;

    use super::*;

    #[test]
    fn test_with_target_rederives_key() {
        let session = SessionContext::new(AuthUser::new("B"), Utc::now());
        assert_eq!(session.key.as_str(), "general");

        let direct = session.with_target(ConversationTarget::Direct(UserId::new("A")));
        assert_eq!(direct.key.as_str(), "A_B");
        assert_eq!(direct.started_at, session.started_at);

        let group = direct.with_target(ConversationTarget::Group(GroupId::new("g1")));
        assert_eq!(group.key.as_str(), "g1");
    }

    #[test]
    fn test_display_name_fallbacks() {
        let session = SessionContext::new(AuthUser::new("A"), Utc::now());
        assert_eq!(session.display_name(None), "User");

        let profile = User {
            display_name: Some("Alice".into()),
            ..Default::default()
        };
        assert_eq!(session.display_name(Some(&profile)), "Alice");
    }
}
