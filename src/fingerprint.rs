//! Session fingerprint capture and comparison.
//!
//! A fingerprint is the (client address, truncated user-agent) pair bound to
//! a session at creation or rotation. On every read it is compared against
//! the current request's fingerprint to detect hijacked session ids; either
//! enabled check failing invalidates the session outright.

use serde::{Deserialize, Serialize};

use crate::manager::RequestContext;

/// Maximum number of user-agent characters stored and compared.
pub const USER_AGENT_MAX_CHARS: usize = 120;

/// The origin identity recorded for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub ip_address: String,
    /// Trimmed and truncated to [`USER_AGENT_MAX_CHARS`] at capture time.
    pub user_agent: String,
}

impl Fingerprint {
    /// Captures the fingerprint of the current request.
    pub fn capture(ctx: &dyn RequestContext) -> Self {
        Self {
            ip_address: ctx.client_address().to_string(),
            user_agent: truncate_user_agent(ctx.user_agent()).to_string(),
        }
    }

    /// Compares a stored fingerprint against the current request's.
    ///
    /// Checks are independent; a disabled check never fails. Comparison is
    /// pure, no side effects.
    pub fn matches(&self, current: &Fingerprint, match_ip: bool, match_user_agent: bool) -> bool {
        if match_ip && self.ip_address != current.ip_address {
            return false;
        }
        if match_user_agent
            && self.user_agent.trim() != truncate_user_agent(current.user_agent.trim())
        {
            return false;
        }
        true
    }
}

/// Trims surrounding whitespace and keeps the first [`USER_AGENT_MAX_CHARS`]
/// characters. Operates on char boundaries, so multi-byte user agents never
/// split mid-codepoint.
pub(crate) fn truncate_user_agent(ua: &str) -> &str {
    let ua = ua.trim();
    match ua.char_indices().nth(USER_AGENT_MAX_CHARS) {
        Some((idx, _)) => &ua[..idx],
        None => ua,
    }
}
