//! Session Store
//!
//! Live sessions indexed by access token. A session dies at `expires_at`
//! no matter how active it is, and earlier if it sits idle for longer than
//! the inactivity timeout.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// An authenticated session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Hard expiry; never extended
    pub expires_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub device_id: String,
    pub created_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_idle_at(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_activity > timeout
    }

    pub fn is_live_at(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        !self.is_expired_at(now) && !self.is_idle_at(timeout, now)
    }
}

/// Concurrent session map
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    timeout: Duration,
}

impl SessionStore {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn insert(&self, session: Session) {
        self.sessions.insert(session.access_token.clone(), session);
    }

    /// Look up a session without touching it
    pub fn get(&self, access_token: &str) -> Option<Session> {
        self.sessions.get(access_token).map(|s| s.clone())
    }

    /// Validate and touch a session. Dead sessions are evicted.
    pub fn validate_at(&self, access_token: &str, now: DateTime<Utc>) -> Option<Session> {
        {
            let mut session = self.sessions.get_mut(access_token)?;
            if session.is_live_at(self.timeout, now) {
                session.last_activity = now;
                return Some(session.clone());
            }
        }

        // The guard is released before removal; re-check so a session that
        // was replaced in between is left alone.
        let timeout = self.timeout;
        self.sessions
            .remove_if(access_token, |_, s| !s.is_live_at(timeout, now));
        None
    }

    /// Refresh `last_activity` for a live session. Returns false (and evicts)
    /// when the session is idle or expired.
    pub fn touch_at(&self, access_token: &str, now: DateTime<Utc>) -> bool {
        self.validate_at(access_token, now).is_some()
    }

    pub fn remove(&self, access_token: &str) -> Option<Session> {
        self.sessions.remove(access_token).map(|(_, s)| s)
    }

    /// Remove the session currently holding `refresh_token`
    pub fn remove_by_refresh_token(&self, refresh_token: &str) -> Option<Session> {
        let access_token = self
            .sessions
            .iter()
            .find(|s| s.refresh_token == refresh_token)
            .map(|s| s.access_token.clone())?;
        self.remove(&access_token)
    }

    /// Remove every session of `user_id`, returning them
    pub fn remove_for_user(&self, user_id: &str) -> Vec<Session> {
        let mut removed = Vec::new();
        self.sessions.retain(|_, s| {
            if s.user_id == user_id {
                removed.push(s.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Drop sessions past their hard expiry
    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> Vec<Session> {
        let mut removed = Vec::new();
        self.sessions.retain(|_, s| {
            if s.is_expired_at(now) {
                removed.push(s.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn sessions_for_user(&self, user_id: &str) -> Vec<Session> {
        self.sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
