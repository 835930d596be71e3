//! Store configuration loaded from `<root>/config.toml`.
//!
//! Every field has an engineering default, so the file is optional. A malformed file is
//! reported in the log and ignored rather than failing the command that loaded it.

use crate::core::schemas;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub const DEFAULT_STALE_AFTER_SECS: u64 = 30 * 60;
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;
pub const DEFAULT_SNAPSHOT_INTERVAL_SECS: u64 = 10 * 60;
pub const DEFAULT_RECENT_DECISIONS: usize = 5;
pub const DEFAULT_ARCHIVE_AFTER_DAYS: u64 = 7;
pub const DEFAULT_DELETE_AFTER_DAYS: u64 = 30;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackboardConfig {
    pub claims: ClaimsConfig,
    pub events: EventsConfig,
    pub sessions: SessionsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimsConfig {
    /// Age in seconds after which a live claim may be superseded.
    pub stale_after_secs: u64,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Maximum number of retained events.
    pub capacity: usize,
    /// Sleep between polls for `events tail --follow`.
    pub poll_interval_secs: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_EVENT_CAPACITY,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub interval_secs: u64,
    pub recent_decisions: usize,
    pub archive_after_days: u64,
    pub delete_after_days: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SNAPSHOT_INTERVAL_SECS,
            recent_decisions: DEFAULT_RECENT_DECISIONS,
            archive_after_days: DEFAULT_ARCHIVE_AFTER_DAYS,
            delete_after_days: DEFAULT_DELETE_AFTER_DAYS,
        }
    }
}

impl BlackboardConfig {
    /// Load `<root>/config.toml`. Missing or malformed files yield the defaults.
    pub fn load(root: &Path) -> Self {
        let path = root.join(schemas::CONFIG_FILE_NAME);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "config unreadable; using defaults"
                );
                return Self::default();
            }
        };
        match toml::from_str::<BlackboardConfig>(&content) {
            Ok(mut config) => {
                config.sanitize();
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "config malformed; using defaults"
                );
                Self::default()
            }
        }
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    fn sanitize(&mut self) {
        // A zero-capacity log could never hold the event just appended.
        if self.events.capacity == 0 {
            self.events.capacity = DEFAULT_EVENT_CAPACITY;
        }
        if self.events.poll_interval_secs == 0 {
            self.events.poll_interval_secs = DEFAULT_POLL_INTERVAL_SECS;
        }
        if self.sessions.interval_secs == 0 {
            self.sessions.interval_secs = DEFAULT_SNAPSHOT_INTERVAL_SECS;
        }
        if self.sessions.delete_after_days < self.sessions.archive_after_days {
            self.sessions.delete_after_days = self.sessions.archive_after_days;
        }
    }
}
