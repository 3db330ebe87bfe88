/// Separator between the two sorted user ids of a direct conversation key
pub const CONVERSATION_KEY_SEPARATOR: char = '_';

/// Conversation shown when nothing is selected
pub const DEFAULT_CONVERSATION: &str = "general";

/// Channels every signed-in user is notified about
pub const PUBLIC_CHANNELS: [&str; 4] = ["general", "random", "design", "development"];

/// Presence heartbeat interval in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Maximum heartbeat age (seconds) for which `online == true` is trusted.
/// One missed beat is tolerated, never more.
pub const PRESENCE_TRUST_WINDOW_SECS: u64 = 2 * HEARTBEAT_INTERVAL_SECS;

/// Number of most recent messages watched for notifications
pub const NOTIFICATION_FEED_LIMIT: usize = 5;

/// Messages older than session start minus this many milliseconds never notify
pub const SESSION_START_TOLERANCE_MS: i64 = 2_000;

/// In-app toast lifetime in seconds
pub const TOAST_DURATION_SECS: u64 = 5;

/// Number of most recent messages scanned when marking a conversation seen
pub const SEEN_SCAN_WINDOW: usize = 50;

/// Clock tick driving toast expiry and scheduled-message release (milliseconds)
pub const CLOCK_TICK_MS: u64 = 1_000;

/// Group message font size when the group has no preference
pub const DEFAULT_MESSAGE_SIZE: u32 = 14;

/// Store collection names
pub const COLLECTION_MESSAGES: &str = "messages";
pub const COLLECTION_USERS: &str = "users";
pub const COLLECTION_GROUPS: &str = "groups";
pub const COLLECTION_SHARED_THEMES: &str = "shared_themes";

/// Media storage path prefixes
pub const MEDIA_PREFIX_IMAGES: &str = "chat_images";
pub const MEDIA_PREFIX_VIDEOS: &str = "chat_videos";
pub const MEDIA_PREFIX_AUDIO: &str = "chat_audio";
pub const MEDIA_PREFIX_GROUPS: &str = "groups";
pub const MEDIA_PREFIX_AVATARS: &str = "avatars";
