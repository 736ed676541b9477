//! Session policy and transport configuration.

use std::time::Duration;

use serde::Deserialize;

/// Default name of the backing table.
pub const DEFAULT_TABLE_NAME: &str = "ci_sessions";

/// Default name of the session cookie.
pub const DEFAULT_COOKIE_NAME: &str = "ci_session";

/// Cookie attributes passed through to the transport layer unchanged.
///
/// The session core does not interpret any of these; they exist so a host
/// framework can carry its cookie settings alongside the session policy in
/// one configuration value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CookieParams {
    /// Cookie lifetime in seconds. `None` means a session cookie.
    pub lifetime: Option<u64>,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub secure: bool,
    pub http_only: bool,
}

/// Policy knobs for the session lifecycle manager and its storage backend.
///
/// All fields have sensible defaults; the only hard requirement is a
/// non-empty [`table_name`](Self::table_name), which is checked when the
/// store is opened.
///
/// ```
/// use hybrid_session_store::SessionConfig;
///
/// let config = SessionConfig::default()
///     .with_table_name("app_sessions")
///     .with_expiration(3600)
///     .with_gc_probability(2);
/// assert!(config.match_ip);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Name of the backing table. Required; the store refuses to open when
    /// this is empty.
    pub table_name: String,
    /// Name of the session cookie, passed through to the transport layer.
    pub cookie_name: String,
    /// Transport cookie attributes, passed through unchanged.
    pub cookie: CookieParams,
    /// Reject sessions whose stored client address differs from the
    /// current request's.
    pub match_ip: bool,
    /// Reject sessions whose stored user-agent prefix differs from the
    /// current request's.
    pub match_user_agent: bool,
    /// Seconds of inactivity after which a session is expired.
    pub expiration: i64,
    /// Minimum seconds between session id rotations.
    pub time_to_update: i64,
    /// Percentage chance, per completed write, that a garbage collection
    /// sweep runs. 0 disables collection entirely.
    pub gc_probability: u8,
    /// Optional cap on how long a storage read may take. A timed-out read
    /// is treated as "no session found" rather than a hard failure.
    pub read_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie: CookieParams::default(),
            match_ip: true,
            match_user_agent: true,
            expiration: 7200,
            time_to_update: 300,
            gc_probability: 5,
            read_timeout: None,
        }
    }
}

impl SessionConfig {
    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = table_name.into();
        self
    }

    pub fn with_cookie_name(mut self, cookie_name: impl Into<String>) -> Self {
        self.cookie_name = cookie_name.into();
        self
    }

    pub fn with_cookie(mut self, cookie: CookieParams) -> Self {
        self.cookie = cookie;
        self
    }

    pub fn with_match_ip(mut self, match_ip: bool) -> Self {
        self.match_ip = match_ip;
        self
    }

    pub fn with_match_user_agent(mut self, match_user_agent: bool) -> Self {
        self.match_user_agent = match_user_agent;
        self
    }

    pub fn with_expiration(mut self, seconds: i64) -> Self {
        self.expiration = seconds;
        self
    }

    pub fn with_time_to_update(mut self, seconds: i64) -> Self {
        self.time_to_update = seconds;
        self
    }

    pub fn with_gc_probability(mut self, percent: u8) -> Self {
        self.gc_probability = percent;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }
}
