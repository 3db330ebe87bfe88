//! Client configuration loaded from environment variables.
//!
//! Every setting has a default matching the shared constants, so a client can
//! start with zero configuration.

use std::str::FromStr;
use std::time::Duration;

use murmur_shared::constants::{
    CLOCK_TICK_MS, HEARTBEAT_INTERVAL_SECS, NOTIFICATION_FEED_LIMIT, PUBLIC_CHANNELS,
    SEEN_SCAN_WINDOW, SESSION_START_TOLERANCE_MS, TOAST_DURATION_SECS,
};

/// Upper bound for every duration setting. Larger values are rejected so
/// timestamp arithmetic stays inside chrono's range.
pub const MAX_CONFIG_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Presence heartbeat period.
    /// Env: `MURMUR_HEARTBEAT_SECS`
    /// Default: 30 s
    pub heartbeat_interval: Duration,

    /// How many of the newest messages the notification feed watches.
    /// Env: `MURMUR_FEED_LIMIT`
    /// Default: `5`
    pub feed_limit: usize,

    /// Grace before session start within which older messages still notify.
    /// Env: `MURMUR_SESSION_TOLERANCE_MS`
    /// Default: 2000 ms
    pub session_start_tolerance: Duration,

    /// In-app toast lifetime.
    /// Env: `MURMUR_TOAST_SECS`
    /// Default: 5 s
    pub toast_duration: Duration,

    /// Number of trailing messages scanned when marking a conversation seen.
    /// Env: `MURMUR_SEEN_WINDOW`
    /// Default: `50`
    pub seen_window: usize,

    /// Period of the clock tick that expires toasts and releases scheduled
    /// messages.
    /// Env: `MURMUR_TICK_MS`
    /// Default: 1000 ms
    pub tick_interval: Duration,

    /// Channels every user is notified about.
    /// Env: `MURMUR_PUBLIC_CHANNELS` (comma separated)
    pub public_channels: Vec<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(HEARTBEAT_INTERVAL_SECS),
            feed_limit: NOTIFICATION_FEED_LIMIT,
            session_start_tolerance: Duration::from_millis(SESSION_START_TOLERANCE_MS as u64),
            toast_duration: Duration::from_secs(TOAST_DURATION_SECS),
            seen_window: SEEN_SCAN_WINDOW,
            tick_interval: Duration::from_millis(CLOCK_TICK_MS),
            public_channels: PUBLIC_CHANNELS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(d) = positive::<u64>("MURMUR_HEARTBEAT_SECS")
            .and_then(|secs| capped("MURMUR_HEARTBEAT_SECS", Duration::from_secs(secs)))
        {
            config.heartbeat_interval = d;
        }

        if let Some(n) = positive::<usize>("MURMUR_FEED_LIMIT") {
            config.feed_limit = n;
        }

        if let Some(d) = parsed::<u64>("MURMUR_SESSION_TOLERANCE_MS")
            .and_then(|ms| capped("MURMUR_SESSION_TOLERANCE_MS", Duration::from_millis(ms)))
        {
            config.session_start_tolerance = d;
        }

        if let Some(d) = positive::<u64>("MURMUR_TOAST_SECS")
            .and_then(|secs| capped("MURMUR_TOAST_SECS", Duration::from_secs(secs)))
        {
            config.toast_duration = d;
        }

        if let Some(n) = positive::<usize>("MURMUR_SEEN_WINDOW") {
            config.seen_window = n;
        }

        if let Some(d) = positive::<u64>("MURMUR_TICK_MS")
            .and_then(|ms| capped("MURMUR_TICK_MS", Duration::from_millis(ms)))
        {
            config.tick_interval = d;
        }

        if let Ok(list) = std::env::var("MURMUR_PUBLIC_CHANNELS") {
            config.public_channels = parse_channel_list(&list);
        }

        // RUST_LOG is handled by tracing-subscriber's EnvFilter.

        config
    }

    /// How long an `online` flag is believed without a fresh heartbeat.
    /// Always two heartbeat intervals, so one missed beat is tolerated.
    pub fn trust_window(&self) -> chrono::Duration {
        let window = self
            .heartbeat_interval
            .checked_mul(2)
            .unwrap_or(MAX_CONFIG_DURATION * 2);
        to_chrono(window.min(MAX_CONFIG_DURATION * 2))
    }

    pub fn tolerance(&self) -> chrono::Duration {
        to_chrono(self.session_start_tolerance.min(MAX_CONFIG_DURATION))
    }

    pub fn toast_lifetime(&self) -> chrono::Duration {
        to_chrono(self.toast_duration.min(MAX_CONFIG_DURATION))
    }

    pub fn is_public_channel(&self, key: &str) -> bool {
        self.public_channels.iter().any(|c| c == key)
    }
}

// Callers clamp first, so the millisecond count always fits.
fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

fn capped(name: &str, value: Duration) -> Option<Duration> {
    if value <= MAX_CONFIG_DURATION {
        Some(value)
    } else {
        tracing::warn!(
            variable = name,
            max_secs = MAX_CONFIG_DURATION.as_secs(),
            "Value too large, using default"
        );
        None
    }
}

fn parsed<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}

fn positive<T: FromStr + PartialOrd + Default>(name: &str) -> Option<T> {
    let value = parsed::<T>(name)?;
    if value > T::default() {
        Some(value)
    } else {
        tracing::warn!(variable = name, "Value must be greater than zero, using default");
        None
    }
}

fn parse_channel_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}
