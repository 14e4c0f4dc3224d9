//! Runtime configuration for the sync engine, read from the environment.

use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use tracing::warn;

pub(crate) const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
pub(crate) const LIST_POLL_SECS: u64 = 12;
pub(crate) const DETAIL_POLL_MS: u64 = 2_500;
pub(crate) const PRESENCE_POLL_SECS: u64 = 30;
pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 12;
/// Uploads stream up to 25 MiB, so they get a longer bound than plain calls.
pub(crate) const UPLOAD_TIMEOUT_SECS: u64 = 120;
/// Display timezone used before any date comparison (UTC+1).
pub(crate) const DISPLAY_UTC_OFFSET_MINUTES: i32 = 60;
pub const MAX_ATTACHMENT_BYTES: u64 = 25 * 1024 * 1024; // 25 MiB
pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub list_poll_interval: Duration,
    pub detail_poll_interval: Duration,
    pub presence_poll_interval: Duration,
    pub request_timeout: Duration,
    pub upload_timeout: Duration,
    pub display_offset: FixedOffset,
    pub max_attachment_bytes: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            list_poll_interval: Duration::from_secs(LIST_POLL_SECS),
            detail_poll_interval: Duration::from_millis(DETAIL_POLL_MS),
            presence_poll_interval: Duration::from_secs(PRESENCE_POLL_SECS),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            upload_timeout: Duration::from_secs(UPLOAD_TIMEOUT_SECS),
            display_offset: offset_from_minutes(DISPLAY_UTC_OFFSET_MINUTES),
            max_attachment_bytes: MAX_ATTACHMENT_BYTES,
        }
    }
}

impl SyncConfig {
    /// Loads `.env` if present, then overrides defaults from `CHAT_*` variables.
    /// Poll intervals and the request timeout are clamped to their supported ranges.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let list_secs = env_number("CHAT_LIST_POLL_SECS", LIST_POLL_SECS).clamp(10, 15);
        let detail_ms = env_number("CHAT_DETAIL_POLL_MS", DETAIL_POLL_MS).clamp(2_000, 3_000);
        let presence_secs = env_number("CHAT_PRESENCE_POLL_SECS", PRESENCE_POLL_SECS).max(1);
        let timeout_secs =
            env_number("CHAT_REQUEST_TIMEOUT_SECS", REQUEST_TIMEOUT_SECS).clamp(10, 15);
        let offset_minutes =
            env_number("CHAT_DISPLAY_UTC_OFFSET_MINUTES", DISPLAY_UTC_OFFSET_MINUTES as i64);

        Self {
            api_base_url: std::env::var("CHAT_API_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base_url),
            api_token: std::env::var("CHAT_API_TOKEN").ok().filter(|t| !t.is_empty()),
            list_poll_interval: Duration::from_secs(list_secs),
            detail_poll_interval: Duration::from_millis(detail_ms),
            presence_poll_interval: Duration::from_secs(presence_secs),
            request_timeout: Duration::from_secs(timeout_secs),
            upload_timeout: Duration::from_secs(
                env_number("CHAT_UPLOAD_TIMEOUT_SECS", UPLOAD_TIMEOUT_SECS).max(timeout_secs),
            ),
            display_offset: offset_from_minutes(offset_minutes as i32),
            max_attachment_bytes: env_number("CHAT_MAX_ATTACHMENT_BYTES", MAX_ATTACHMENT_BYTES),
        }
    }
}

fn env_number<T: std::str::FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("Ignoring invalid value for {name}: {raw}");
            default
        }),
        Err(_) => default,
    }
}

/// Out-of-range offsets fall back to UTC.
pub(crate) fn offset_from_minutes(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes.saturating_mul(60)).unwrap_or_else(|| {
        warn!("Display offset of {minutes} minutes is out of range, using UTC");
        Utc.fix()
    })
}
