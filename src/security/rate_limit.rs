//! Rate Limiting Module
//!
//! Fixed-window attempt counters keyed by an arbitrary identifier
//! (`"login:<email>"`, `"<chain>:<ip>"`, ...).
//!
//! A window starts on the first attempt and lasts `window_secs`. Once it has
//! elapsed the next attempt replaces the entry outright, so a client can spend
//! a full budget on each side of a window boundary.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

use crate::security::config::bounded_seconds;

/// Prefix for login-attempt identifiers
pub const LOGIN_KEY_PREFIX: &str = "login:";

/// Counting state for one identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitEntry {
    pub attempts: u32,
    pub window_start: DateTime<Utc>,
}

impl RateLimitEntry {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            attempts: 1,
            window_start: now,
        }
    }

    fn is_stale(&self, window: Duration, now: DateTime<Utc>) -> bool {
        now - self.window_start >= window
    }
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub attempts_remaining: u32,
    /// End of the current window
    pub reset_time: DateTime<Utc>,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, never less than one
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_time - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// In-memory fixed-window rate limiter
///
/// Each check runs under the map's per-key shard lock, so concurrent checks
/// for the same identifier are serialised.
#[derive(Debug, Default)]
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check and count one attempt for `identifier`.
    pub fn check_rate_limit(&self, identifier: &str, max_attempts: u32, window_secs: u64) -> bool {
        self.check_at(identifier, max_attempts, window_secs, Utc::now())
            .allowed
    }

    pub fn check(&self, identifier: &str, max_attempts: u32, window_secs: u64) -> RateLimitDecision {
        self.check_at(identifier, max_attempts, window_secs, Utc::now())
    }

    /// Same as [`RateLimiter::check`] with an explicit clock reading.
    pub fn check_at(
        &self,
        identifier: &str,
        max_attempts: u32,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let window = bounded_seconds(window_secs);

        match self.entries.entry(identifier.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(RateLimitEntry::fresh(now));
                RateLimitDecision {
                    allowed: true,
                    attempts_remaining: max_attempts.saturating_sub(1),
                    reset_time: now + window,
                }
            }
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();

                if entry.is_stale(window, now) {
                    *entry = RateLimitEntry::fresh(now);
                    return RateLimitDecision {
                        allowed: true,
                        attempts_remaining: max_attempts.saturating_sub(1),
                        reset_time: now + window,
                    };
                }

                let reset_time = entry.window_start + window;

                if entry.attempts >= max_attempts {
                    return RateLimitDecision {
                        allowed: false,
                        attempts_remaining: 0,
                        reset_time,
                    };
                }

                entry.attempts += 1;
                RateLimitDecision {
                    allowed: true,
                    attempts_remaining: max_attempts.saturating_sub(entry.attempts),
                    reset_time,
                }
            }
        }
    }

    /// Current entry for `identifier`, if any
    pub fn entry(&self, identifier: &str) -> Option<RateLimitEntry> {
        self.entries.get(identifier).map(|e| *e)
    }

    /// Forget an identifier (e.g. after a successful login)
    pub fn reset(&self, identifier: &str) {
        self.entries.remove(identifier);
    }

    /// Drop entries whose window started at least `max_window_secs` ago.
    pub fn prune_stale_at(&self, max_window_secs: u64, now: DateTime<Utc>) -> usize {
        let window = bounded_seconds(max_window_secs);
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_stale(window, now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn login_key(email: &str) -> String {
    format!("{}{}", LOGIN_KEY_PREFIX, email.trim().to_lowercase())
}

/// Resolve the caller's address: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then the peer address.
pub fn extract_client_ip<B>(req: &axum::http::Request<B>, trust_forwarded: bool) -> String {
    if trust_forwarded {
        if let Some(ip) = req.headers().get("x-forwarded-for") {
            if let Ok(ip_str) = ip.to_str() {
                let first = ip_str.split(',').next().unwrap_or(ip_str).trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }

        if let Some(ip) = req.headers().get("x-real-ip") {
            if let Ok(ip_str) = ip.to_str() {
                return ip_str.trim().to_string();
            }
        }
    }

    if let Some(axum::extract::ConnectInfo(addr)) = req
        .extensions()
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
    {
        return addr.ip().to_string();
    }

    if let Some(peer) = req.extensions().get::<SocketAddr>() {
        return peer.ip().to_string();
    }

    "unknown".to_string()
}
