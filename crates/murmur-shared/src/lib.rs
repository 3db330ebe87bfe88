pub mod clock;
pub mod constants;
pub mod identity;
pub mod models;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::{direct_key, identity_for, ConversationKey, ConversationTarget};
pub use models::{
    ContactSettings, DeliveryState, Group, MediaKind, MediaRef, Message, Record, SharedTheme, User,
};
pub use types::{GroupId, MessageId, NotificationPermission, UserId, Visibility};
