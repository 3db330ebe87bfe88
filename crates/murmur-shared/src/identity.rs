//! Conversation identity derivation.
//!
//! Messages and shared themes are partitioned by a [`ConversationKey`]. For a
//! direct chat the key is synthetic: both participants compute it locally by
//! sorting the two user ids and joining them, so it never needs to be stored.

use serde::{Deserialize, Serialize};

use crate::constants::{CONVERSATION_KEY_SEPARATOR, DEFAULT_CONVERSATION};
use crate::types::{GroupId, UserId};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ConversationKey(pub String);

impl ConversationKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The well-known key used when no conversation is selected.
    pub fn general() -> Self {
        Self(DEFAULT_CONVERSATION.to_string())
    }

    /// Whether this key is a direct conversation that includes `user`.
    ///
    /// Matches `user` as a whole prefix or suffix bounded by the separator.
    /// Keys are not escaped, so when user ids themselves contain the
    /// separator a key can involve more than its two participants
    /// (`a_b_c` involves `a`, `a_b`, `b_c` and `c`). Auth-issued ids never do.
    pub fn involves(&self, user: &UserId) -> bool {
        let key = self.0.as_str();
        let id = user.as_str();
        if id.is_empty() {
            return false;
        }
        let leading = key
            .strip_prefix(id)
            .is_some_and(|rest| rest.starts_with(CONVERSATION_KEY_SEPARATOR));
        let trailing = key.strip_suffix(id).is_some_and(|rest| {
            rest.ends_with(CONVERSATION_KEY_SEPARATOR)
        });
        leading || trailing
    }

}

impl Default for ConversationKey {
    fn default() -> Self {
        Self::general()
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What the user currently has open.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConversationTarget {
    /// Nothing selected; the default public channel is shown.
    #[default]
    None,
    /// One-to-one chat with another user.
    Direct(UserId),
    /// A group the user is a member of.
    Group(GroupId),
    /// A named public channel.
    Channel(String),
}

impl ConversationTarget {
    /// Whether this target carries a per-conversation shared theme.
    pub fn has_shared_theme(&self) -> bool {
        matches!(self, Self::Direct(_) | Self::Group(_))
    }
}

/// Derive the canonical conversation key for `self_id` looking at `target`.
///
/// Total and pure: every input maps to a key, and for direct chats the
/// result is identical whichever participant computes it.
pub fn identity_for(self_id: &UserId, target: &ConversationTarget) -> ConversationKey {
    match target {
        ConversationTarget::None => ConversationKey::general(),
        ConversationTarget::Group(group) => ConversationKey(group.0.clone()),
        ConversationTarget::Channel(name) => ConversationKey(name.clone()),
        ConversationTarget::Direct(other) => direct_key(self_id, other),
    }
}

/// Key for a direct chat between `a` and `b`, independent of argument order.
pub fn direct_key(a: &UserId, b: &UserId) -> ConversationKey {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let mut key = String::with_capacity(first.0.len() + second.0.len() + 1);
    key.push_str(&first.0);
    key.push(CONVERSATION_KEY_SEPARATOR);
    key.push_str(&second.0);
    ConversationKey(key)
}
