//! Security Service
//!
//! Owns the session store, the rate limiter, the audit log and the durable
//! refresh-token index. One instance is built at start-up and shared through
//! `Arc`; nothing else touches the stores directly.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::observability::SecurityMetrics;
use crate::security::audit::{AuditLog, AuditSink, events};
use crate::security::config::SecuritySettings;
use crate::security::credentials::{self, PasswordAssessment, PasswordHash};
use crate::security::csrf;
use crate::security::rate_limit::{RateLimitDecision, RateLimiter, login_key};
use crate::security::session::{Session, SessionStore};
use crate::storage::kv::PlatformKeyValueStore;

/// Key prefix of refresh-token records in the durable store
pub const REFRESH_TOKEN_PREFIX: &str = "refresh_token:";

/// Durable refresh-token index entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRecord {
    pub user_id: String,
    pub device_id: String,
    pub issued_at: DateTime<Utc>,
}

/// What one sweep pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub sessions_removed: usize,
    pub refresh_tokens_purged: usize,
    pub rate_limit_entries_pruned: usize,
}

fn refresh_key(refresh_token: &str) -> String {
    format!("{}{}", REFRESH_TOKEN_PREFIX, refresh_token)
}

pub struct SecurityService {
    settings: SecuritySettings,
    sessions: SessionStore,
    rate_limiter: RateLimiter,
    audit: AuditLog,
    token_store: Arc<dyn PlatformKeyValueStore>,
    /// Refresh tokens already rotated away, kept to flag replays
    consumed_refresh_tokens: DashMap<String, (String, DateTime<Utc>)>,
    metrics: Arc<SecurityMetrics>,
}

impl std::fmt::Debug for SecurityService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityService")
            .field("settings", &self.settings)
            .field("sessions", &self.sessions.len())
            .field("rate_limiter", &self.rate_limiter.len())
            .field("token_store", &self.token_store.backend_name())
            .finish()
    }
}

impl SecurityService {
    pub fn new(
        settings: SecuritySettings,
        token_store: Arc<dyn PlatformKeyValueStore>,
        audit_sink: Arc<dyn AuditSink>,
        metrics: Arc<SecurityMetrics>,
    ) -> Self {
        Self {
            sessions: SessionStore::new(settings.session_timeout()),
            rate_limiter: RateLimiter::new(),
            audit: AuditLog::new(audit_sink, settings.audit_buffer_size),
            token_store,
            consumed_refresh_tokens: DashMap::new(),
            metrics,
            settings,
        }
    }

    pub fn settings(&self) -> &SecuritySettings {
        &self.settings
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub fn metrics(&self) -> &Arc<SecurityMetrics> {
        &self.metrics
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn update_session_gauge(&self) {
        self.metrics.set_active_sessions(self.sessions.len());
    }

    // ===== Sessions =====

    pub async fn create_session(&self, user_id: &str, device_id: &str) -> Result<Session> {
        self.create_session_at(user_id, device_id, Utc::now()).await
    }

    /// Issue a new token pair for `user_id` bound to `device_id`.
    pub async fn create_session_at(
        &self,
        user_id: &str,
        device_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Session> {
        let token_bytes = self.settings.token_bytes;
        let (access_token, refresh_token) = tokio::task::spawn_blocking(move || {
            Ok::<_, crate::error::AppError>((
                credentials::generate_secure_token(token_bytes)?,
                credentials::generate_secure_token(token_bytes)?,
            ))
        })
        .await??;

        let session = Session {
            user_id: user_id.to_string(),
            access_token,
            refresh_token,
            expires_at: now + self.settings.access_token_expiry(),
            last_activity: now,
            device_id: device_id.to_string(),
            created_at: now,
        };

        let record = RefreshTokenRecord {
            user_id: session.user_id.clone(),
            device_id: session.device_id.clone(),
            issued_at: now,
        };
        self.token_store
            .set(
                &refresh_key(&session.refresh_token),
                serde_json::to_string(&record)?,
            )
            .await?;

        self.sessions.insert(session.clone());
        self.metrics.record_session_created();
        self.update_session_gauge();

        debug!(user_id, device_id, "Session created");
        Ok(session)
    }

    pub fn validate_session(&self, access_token: &str) -> Option<Session> {
        self.validate_session_at(access_token, Utc::now())
    }

    /// Resolve a live session and mark it active. Expired or idle sessions
    /// are evicted and `None` is returned.
    pub fn validate_session_at(&self, access_token: &str, now: DateTime<Utc>) -> Option<Session> {
        let session = self.sessions.validate_at(access_token, now);
        if session.is_none() {
            self.update_session_gauge();
        }
        session
    }

    pub fn touch_session(&self, access_token: &str) -> bool {
        self.touch_session_at(access_token, Utc::now())
    }

    pub fn touch_session_at(&self, access_token: &str, now: DateTime<Utc>) -> bool {
        self.sessions.touch_at(access_token, now)
    }

    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Option<Session>> {
        self.refresh_session_at(refresh_token, Utc::now()).await
    }

    /// Exchange a refresh token for a new session. The refresh token is
    /// consumed; `None` means the caller must log in again.
    pub async fn refresh_session_at(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>> {
        let Some(raw) = self.token_store.remove(&refresh_key(refresh_token)).await? else {
            match self.consumed_refresh_tokens.get(refresh_token) {
                Some(entry) => {
                    let user_id = entry.0.clone();
                    drop(entry);
                    self.log_security_event(
                        events::REFRESH_TOKEN_REUSE,
                        Some(&user_id),
                        Some(json!({ "reason": "refresh token already rotated" })),
                    );
                }
                None => self.log_security_event(
                    events::REFRESH_TOKEN_INVALID,
                    None,
                    Some(json!({ "reason": "unknown refresh token" })),
                ),
            }
            return Ok(None);
        };

        let record: RefreshTokenRecord = serde_json::from_str(&raw)?;
        self.sessions.remove_by_refresh_token(refresh_token);

        if now - record.issued_at > self.settings.refresh_token_expiry() {
            self.log_security_event(
                events::REFRESH_TOKEN_INVALID,
                Some(&record.user_id),
                Some(json!({ "reason": "refresh token expired" })),
            );
            self.update_session_gauge();
            return Ok(None);
        }

        self.consumed_refresh_tokens
            .insert(refresh_token.to_string(), (record.user_id.clone(), now));

        let session = self
            .create_session_at(&record.user_id, &record.device_id, now)
            .await?;
        self.metrics.record_session_refreshed();
        self.log_security_event(
            events::SESSION_REFRESHED,
            Some(&record.user_id),
            Some(json!({ "deviceId": record.device_id })),
        );

        Ok(Some(session))
    }

    /// Remove a session and its refresh record. Unknown tokens are a no-op.
    pub async fn invalidate_session(&self, access_token: &str) -> Result<()> {
        if let Some(session) = self.sessions.remove(access_token) {
            self.token_store
                .remove(&refresh_key(&session.refresh_token))
                .await?;
            self.metrics.record_sessions_invalidated(1);
            self.update_session_gauge();
            debug!(user_id = %session.user_id, "Session invalidated");
        }
        Ok(())
    }

    /// Log `user_id` out everywhere. Returns the number of live sessions removed.
    pub async fn invalidate_all_user_sessions(&self, user_id: &str) -> Result<usize> {
        let removed = self.sessions.remove_for_user(user_id);
        for session in &removed {
            self.token_store
                .remove(&refresh_key(&session.refresh_token))
                .await?;
        }

        // Refresh records can outlive their sessions
        let mut orphaned = 0;
        for key in self.token_store.keys_with_prefix(REFRESH_TOKEN_PREFIX).await? {
            let Some(raw) = self.token_store.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<RefreshTokenRecord>(&raw) {
                Ok(record) if record.user_id == user_id => {
                    self.token_store.remove(&key).await?;
                    orphaned += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(key = %key, error = %e, "Skipping unreadable refresh record"),
            }
        }

        self.metrics.record_sessions_invalidated(removed.len());
        self.update_session_gauge();
        self.log_security_event(
            events::ALL_SESSIONS_INVALIDATED,
            Some(user_id),
            Some(json!({ "sessions": removed.len(), "orphanedRefreshTokens": orphaned })),
        );

        Ok(removed.len())
    }

    pub async fn sweep_expired_sessions(&self) -> Result<SweepReport> {
        self.sweep_expired_sessions_at(Utc::now()).await
    }

    /// Drop sessions past hard expiry, stale refresh records and elapsed
    /// rate-limit windows.
    ///
    /// Refresh records of swept sessions are kept: a refresh token is meant to
    /// outlive its access token.
    pub async fn sweep_expired_sessions_at(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let sessions_removed = self.sessions.sweep_expired_at(now).len();

        let refresh_expiry = self.settings.refresh_token_expiry();
        let mut refresh_tokens_purged = 0;
        for key in self.token_store.keys_with_prefix(REFRESH_TOKEN_PREFIX).await? {
            let Some(raw) = self.token_store.get(&key).await? else {
                continue;
            };
            let stale = match serde_json::from_str::<RefreshTokenRecord>(&raw) {
                Ok(record) => now - record.issued_at > refresh_expiry,
                Err(_) => true,
            };
            if stale && self.token_store.remove(&key).await?.is_some() {
                refresh_tokens_purged += 1;
            }
        }

        self.consumed_refresh_tokens
            .retain(|_, (_, consumed_at)| now - *consumed_at <= refresh_expiry);

        let limits = &self.settings.rate_limits;
        let longest_window = [
            self.settings.login_attempt_window_secs,
            limits.auth.window_secs,
            limits.protected.window_secs,
            limits.admin.window_secs,
            limits.sensitive.window_secs,
        ]
        .into_iter()
        .max()
        .unwrap_or_default();
        let rate_limit_entries_pruned = self.rate_limiter.prune_stale_at(longest_window, now);

        self.metrics.record_sessions_swept(sessions_removed);
        self.update_session_gauge();

        let report = SweepReport {
            sessions_removed,
            refresh_tokens_purged,
            rate_limit_entries_pruned,
        };
        if sessions_removed > 0 || refresh_tokens_purged > 0 {
            self.log_security_event(
                events::SESSIONS_SWEPT,
                None,
                serde_json::to_value(report).ok(),
            );
        }
        Ok(report)
    }

    /// Run the expiry sweep every `sweep_interval_secs` until `shutdown` fires.
    pub fn spawn_session_sweeper(
        self: &Arc<Self>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let period = service.settings.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            info!(interval_secs = period.as_secs(), "Session sweeper started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match service.sweep_expired_sessions().await {
                            Ok(report) => debug!(?report, "Session sweep finished"),
                            Err(e) => warn!(error = %e, "Session sweep failed"),
                        }
                    }
                    _ = shutdown.recv() => {
                        info!("Session sweeper stopping");
                        break;
                    }
                }
            }
        })
    }

    // ===== Rate limiting =====

    pub fn check_rate_limit(&self, identifier: &str, max_attempts: u32, window_secs: u64) -> bool {
        self.rate_limiter
            .check_rate_limit(identifier, max_attempts, window_secs)
    }

    pub fn check_rate_limit_detailed(
        &self,
        identifier: &str,
        max_attempts: u32,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        self.rate_limiter
            .check_at(identifier, max_attempts, window_secs, now)
    }

    pub fn check_login_attempts(&self, email: &str) -> RateLimitDecision {
        self.check_login_attempts_at(email, Utc::now())
    }

    /// Count one login attempt for `email` against the login budget.
    pub fn check_login_attempts_at(&self, email: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let decision = self.rate_limiter.check_at(
            &login_key(email),
            self.settings.max_login_attempts,
            self.settings.login_attempt_window_secs,
            now,
        );

        if !decision.allowed {
            self.log_security_event(
                events::LOGIN_RATE_LIMITED,
                None,
                Some(json!({ "email": email, "resetTime": decision.reset_time })),
            );
        }
        decision
    }

    pub fn reset_login_attempts(&self, email: &str) {
        self.rate_limiter.reset(&login_key(email));
    }

    // ===== Credentials =====

    pub async fn generate_secure_token(&self, length: usize) -> Result<String> {
        tokio::task::spawn_blocking(move || credentials::generate_secure_token(length)).await?
    }

    pub async fn hash_password(&self, password: &str, salt: Option<&str>) -> Result<PasswordHash> {
        let password = password.to_string();
        let salt = salt.map(str::to_string);
        tokio::task::spawn_blocking(move || credentials::hash_password(&password, salt.as_deref()))
            .await?
    }

    pub async fn verify_password(&self, password: &str, hash: &str, salt: &str) -> Result<bool> {
        let (password, hash, salt) = (password.to_string(), hash.to_string(), salt.to_string());
        Ok(
            tokio::task::spawn_blocking(move || credentials::verify_password(&password, &hash, &salt))
                .await?,
        )
    }

    pub fn validate_password_strength(&self, password: &str) -> PasswordAssessment {
        credentials::validate_password_strength(password)
    }

    pub async fn generate_csrf_token(&self) -> Result<String> {
        tokio::task::spawn_blocking(csrf::generate_csrf_token).await?
    }

    pub fn validate_csrf_token(&self, token: &str, session_token: &str) -> bool {
        csrf::validate_csrf_token(token, session_token)
    }

    // ===== Audit =====

    pub fn log_security_event(&self, event: &str, user_id: Option<&str>, details: Option<Value>) {
        self.metrics.record_security_event();
        self.audit.log_security_event(event, user_id, details);
    }
}
