//! Security Configuration
//!
//! Session lifetimes, login limits and per-chain rate limit policies.

use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Longest lifetime or window accepted anywhere in the security settings
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Convert configured seconds to a `Duration`, clamped to [`MAX_DURATION_SECS`].
pub fn bounded_seconds(secs: u64) -> Duration {
    Duration::seconds(secs.min(MAX_DURATION_SECS) as i64)
}

/// Fixed-window budget for one middleware chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Requests allowed per window
    pub max_requests: u32,
    /// Window length in seconds
    pub window_secs: u64,
}

impl RateLimitPolicy {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }
}

/// Rate limit policies for the four named chains
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainRateLimits {
    pub auth: RateLimitPolicy,
    pub protected: RateLimitPolicy,
    pub admin: RateLimitPolicy,
    pub sensitive: RateLimitPolicy,
}

impl Default for ChainRateLimits {
    fn default() -> Self {
        Self {
            auth: RateLimitPolicy::new(10, 60),
            protected: RateLimitPolicy::new(100, 60),
            admin: RateLimitPolicy::new(50, 60),
            sensitive: RateLimitPolicy::new(5, 300),
        }
    }
}

/// Security layer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Access token lifetime (hard expiry) in seconds
    pub access_token_expiry_secs: u64,
    /// Inactivity timeout in seconds
    pub session_timeout_secs: u64,
    /// Refresh token lifetime in days
    pub refresh_token_expiry_days: u64,
    /// Random bytes per access/refresh token
    pub token_bytes: usize,
    /// Failed logins allowed per email per window
    pub max_login_attempts: u32,
    /// Login attempt window in seconds
    pub login_attempt_window_secs: u64,
    /// Interval of the background expiry sweep in seconds
    pub sweep_interval_secs: u64,
    /// Per-chain request budgets
    pub rate_limits: ChainRateLimits,
    /// Key clients by X-Forwarded-For / X-Real-IP when present
    pub trust_forwarded_for: bool,
    /// Maximum request body the input guards will buffer
    pub max_request_size: usize,
    /// Number of audit events kept in memory for the admin view
    pub audit_buffer_size: usize,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            access_token_expiry_secs: 15 * 60,
            session_timeout_secs: 30 * 60,
            refresh_token_expiry_days: 7,
            token_bytes: 32,
            max_login_attempts: 5,
            login_attempt_window_secs: 15 * 60,
            sweep_interval_secs: 60,
            rate_limits: ChainRateLimits::default(),
            trust_forwarded_for: true,
            max_request_size: 1024 * 1024,
            audit_buffer_size: 200,
        }
    }
}

impl SecuritySettings {
    /// Create development security settings
    pub fn development() -> Self {
        Self::default()
    }

    /// Create production security settings
    pub fn production() -> Self {
        Self {
            trust_forwarded_for: false,
            audit_buffer_size: 1000,
            ..Self::default()
        }
    }

    pub fn access_token_expiry(&self) -> Duration {
        bounded_seconds(self.access_token_expiry_secs)
    }

    pub fn session_timeout(&self) -> Duration {
        bounded_seconds(self.session_timeout_secs)
    }

    pub fn refresh_token_expiry(&self) -> Duration {
        bounded_seconds(self.refresh_token_expiry_days.saturating_mul(24 * 60 * 60))
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations_clamp_instead_of_overflowing() {
        let settings = SecuritySettings {
            access_token_expiry_secs: u64::MAX,
            session_timeout_secs: u64::MAX,
            refresh_token_expiry_days: u64::MAX,
            ..SecuritySettings::default()
        };
        let ceiling = Duration::seconds(MAX_DURATION_SECS as i64);

        assert_eq!(settings.access_token_expiry(), ceiling);
        assert_eq!(settings.session_timeout(), ceiling);
        assert_eq!(settings.refresh_token_expiry(), ceiling);
    }

    #[test]
    fn test_default_durations() {
        let settings = SecuritySettings::default();
        assert_eq!(settings.access_token_expiry(), Duration::minutes(15));
        assert_eq!(settings.session_timeout(), Duration::minutes(30));
        assert_eq!(settings.refresh_token_expiry(), Duration::days(7));
    }
}
