//! Construction-time options for a session.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default heartbeat interval (30 s).
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
/// Default delay between reconnect attempts (3 s).
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3_000;
/// Default reconnect attempt budget.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
/// Default bound on a single transport open (10 s).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Session configuration.
///
/// Durations are stored in milliseconds so the struct deserializes from the
/// same shape the dashboard uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Remote endpoint URL.
    pub url: String,

    /// Token sent in the `auth` envelope right after open.
    pub token: Option<String>,

    pub heartbeat_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub auto_reconnect: bool,
    pub connect_timeout_ms: u64,

    /// Treat a ping left unanswered until the next heartbeat as a dead peer.
    pub require_pong: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: None,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            auto_reconnect: true,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            require_pong: false,
        }
    }
}

impl SessionConfig {
    /// Create a config for a URL with default policy.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = duration_ms(interval);
        self
    }

    #[must_use]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = duration_ms(delay);
        self
    }

    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = duration_ms(timeout);
        self
    }

    #[must_use]
    pub fn with_require_pong(mut self, enabled: bool) -> Self {
        self.require_pong = enabled;
        self
    }

    /// Heartbeat interval, never zero.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
