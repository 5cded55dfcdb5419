//! Scheduling configuration.

use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::queue::SelectionMode;

/// Parameters a scheduler passes to the round queue and event dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// How long to wait for an upcoming round before giving up.
    #[serde(rename = "upcoming_timeout_ms", with = "millis")]
    pub upcoming_timeout: Duration,

    /// How long a round-event subscription stays registered.
    #[serde(rename = "event_timeout_ms", with = "millis")]
    pub event_timeout: Duration,

    /// Minimum number of non-excluded rounds that must be queued ahead of
    /// the one returned.
    pub min_queue_depth: usize,

    /// Which end of the queue to pull from.
    pub selection_mode: SelectionMode,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            upcoming_timeout: Duration::from_secs(5),
            event_timeout: Duration::from_secs(60),
            min_queue_depth: 0,
            selection_mode: SelectionMode::Closest,
        }
    }
}

impl SchedulingConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            upcoming_timeout: env_parse("CMIX_UPCOMING_TIMEOUT_MS")
                .map_or(defaults.upcoming_timeout, Duration::from_millis),
            event_timeout: env_parse("CMIX_EVENT_TIMEOUT_MS")
                .map_or(defaults.event_timeout, Duration::from_millis),
            min_queue_depth: env_parse("CMIX_MIN_QUEUE_DEPTH").unwrap_or(defaults.min_queue_depth),
            selection_mode: env_parse("CMIX_SELECTION_MODE").unwrap_or(defaults.selection_mode),
        }
    }

    /// Set the upcoming-round timeout.
    #[must_use]
    pub fn with_upcoming_timeout(mut self, timeout: Duration) -> Self {
        self.upcoming_timeout = timeout;
        self
    }

    /// Set the round-event timeout.
    #[must_use]
    pub fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_min_queue_depth(mut self, depth: usize) -> Self {
        self.min_queue_depth = depth;
        self
    }

    #[must_use]
    pub fn with_selection_mode(mut self, mode: SelectionMode) -> Self {
        self.selection_mode = mode;
        self
    }
}

/// Parse an environment variable. Unset and invalid values yield `None`;
/// invalid ones are logged.
fn env_parse<T>(key: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(key, value = %raw, error = %e, "Invalid scheduling setting, using default");
            None
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
