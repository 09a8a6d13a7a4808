//! Security Audit Log
//!
//! Classifies security events by severity and hands them to an [`AuditSink`].
//! Logging an event never fails: sink errors and panics are swallowed so a
//! broken sink cannot take down the request path.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tracing target for audit records
pub const AUDIT_TARGET: &str = "security_audit";

/// Well-known event names
pub mod events {
    pub const LOGIN_SUCCESS: &str = "LOGIN_SUCCESS";
    pub const LOGIN_FAILED: &str = "LOGIN_FAILED";
    pub const LOGIN_RATE_LIMITED: &str = "LOGIN_RATE_LIMITED";
    pub const LOGOUT: &str = "LOGOUT";
    pub const USER_REGISTERED: &str = "USER_REGISTERED";
    pub const SESSION_CREATED: &str = "SESSION_CREATED";
    pub const SESSION_REFRESHED: &str = "SESSION_REFRESHED";
    pub const SESSION_TIMEOUT: &str = "SESSION_TIMEOUT";
    pub const SESSIONS_SWEPT: &str = "SESSIONS_SWEPT";
    pub const INVALID_SESSION: &str = "INVALID_SESSION";
    pub const REFRESH_TOKEN_INVALID: &str = "REFRESH_TOKEN_INVALID";
    pub const REFRESH_TOKEN_REUSE: &str = "REFRESH_TOKEN_REUSE";
    pub const ALL_SESSIONS_INVALIDATED: &str = "ALL_SESSIONS_INVALIDATED";
    pub const PASSWORD_CHANGED: &str = "PASSWORD_CHANGED";
    pub const WEAK_PASSWORD_REJECTED: &str = "WEAK_PASSWORD_REJECTED";
    pub const CSRF_TOKEN_MISSING: &str = "CSRF_TOKEN_MISSING";
    pub const CSRF_TOKEN_INVALID: &str = "CSRF_TOKEN_INVALID";
    pub const DEVICE_MISMATCH: &str = "DEVICE_MISMATCH";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const ADMIN_ACCESS_DENIED: &str = "ADMIN_ACCESS_DENIED";
    pub const PRIVILEGE_ESCALATION_ATTEMPT: &str = "PRIVILEGE_ESCALATION_ATTEMPT";
    pub const AUTH_REQUEST: &str = "AUTH_REQUEST";
    pub const HTTP_ERROR: &str = "HTTP_ERROR";
}

const CRITICAL_EVENTS: &[&str] = &[
    events::PRIVILEGE_ESCALATION_ATTEMPT,
    events::DEVICE_MISMATCH,
    events::REFRESH_TOKEN_REUSE,
];

const HIGH_EVENTS: &[&str] = &[
    events::LOGIN_RATE_LIMITED,
    events::RATE_LIMIT_EXCEEDED,
    events::CSRF_TOKEN_INVALID,
    events::ADMIN_ACCESS_DENIED,
    events::ALL_SESSIONS_INVALIDATED,
];

const MEDIUM_EVENTS: &[&str] = &[
    events::LOGIN_FAILED,
    events::INVALID_SESSION,
    events::SESSION_TIMEOUT,
    events::CSRF_TOKEN_MISSING,
    events::REFRESH_TOKEN_INVALID,
    events::WEAK_PASSWORD_REJECTED,
    events::PASSWORD_CHANGED,
    events::HTTP_ERROR,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Classify an event name; anything unlisted is low
    pub fn classify(event: &str) -> Self {
        if CRITICAL_EVENTS.contains(&event) {
            Severity::Critical
        } else if HIGH_EVENTS.contains(&event) {
            Severity::High
        } else if MEDIUM_EVENTS.contains(&event) {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A classified, timestamped security event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub event: String,
    pub severity: Severity,
    pub user_id: Option<String>,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// Destination for audit records (external monitoring in production)
#[cfg_attr(test, mockall::automock)]
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: &SecurityEvent) -> anyhow::Result<()>;
}

/// Sink that writes audit records through `tracing`
#[derive(Debug, Clone, Copy)]
pub struct TracingAuditSink {
    verbose: bool,
}

impl TracingAuditSink {
    /// Verbose output with full details, for local debugging
    pub fn development() -> Self {
        Self { verbose: true }
    }

    /// Warning-level records on the audit target
    pub fn production() -> Self {
        Self { verbose: false }
    }
}

impl AuditSink for TracingAuditSink {
    fn emit(&self, e: &SecurityEvent) -> anyhow::Result<()> {
        let user_id = e.user_id.as_deref().unwrap_or("-");

        if !self.verbose {
            tracing::warn!(
                target: AUDIT_TARGET,
                event = %e.event,
                severity = %e.severity,
                user_id,
                details = %e.details,
                timestamp = %e.timestamp.to_rfc3339(),
                "Security event"
            );
            return Ok(());
        }

        let details = serde_json::to_string_pretty(&e.details)?;
        match e.severity {
            Severity::Critical | Severity::High => tracing::warn!(
                target: AUDIT_TARGET,
                event = %e.event,
                severity = %e.severity,
                user_id,
                "Security event\n{}",
                details
            ),
            Severity::Medium => tracing::info!(
                target: AUDIT_TARGET,
                event = %e.event,
                severity = %e.severity,
                user_id,
                "Security event\n{}",
                details
            ),
            Severity::Low => tracing::debug!(
                target: AUDIT_TARGET,
                event = %e.event,
                severity = %e.severity,
                user_id,
                "Security event\n{}",
                details
            ),
        }
        Ok(())
    }
}

/// Audit log with a bounded in-memory history
pub struct AuditLog {
    sink: Arc<dyn AuditSink>,
    recent: Mutex<VecDeque<SecurityEvent>>,
    capacity: usize,
    counts: [AtomicU64; 4],
}

impl fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuditLog")
            .field("sink", &"Arc<dyn AuditSink>")
            .field("capacity", &self.capacity)
            .field("recent", &self.recent.lock().len())
            .finish()
    }
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>, capacity: usize) -> Self {
        Self {
            sink,
            recent: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            counts: Default::default(),
        }
    }

    /// Record a security event. Never fails.
    pub fn log_security_event(&self, event: &str, user_id: Option<&str>, details: Option<Value>) {
        let record = SecurityEvent {
            event: event.to_string(),
            severity: Severity::classify(event),
            user_id: user_id.map(str::to_string),
            details: details.unwrap_or(Value::Null),
            timestamp: Utc::now(),
        };

        self.counts[record.severity.index()].fetch_add(1, Ordering::Relaxed);

        match catch_unwind(AssertUnwindSafe(|| self.sink.emit(&record))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(event = %record.event, error = %e, "Audit sink rejected event")
            }
            Err(_) => tracing::debug!(event = %record.event, "Audit sink panicked"),
        }

        if self.capacity > 0 {
            let mut recent = self.recent.lock();
            if recent.len() >= self.capacity {
                recent.pop_front();
            }
            recent.push_back(record);
        }
    }

    /// Most recent events, newest first
    pub fn recent_events(&self, limit: usize, min_severity: Option<Severity>) -> Vec<SecurityEvent> {
        let floor = min_severity.unwrap_or(Severity::Low);
        self.recent
            .lock()
            .iter()
            .rev()
            .filter(|e| e.severity >= floor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Number of events logged at `severity` since start-up
    pub fn count(&self, severity: Severity) -> u64 {
        self.counts[severity.index()].load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(events::DEVICE_MISMATCH, Severity::Critical)]
    #[case(events::REFRESH_TOKEN_REUSE, Severity::Critical)]
    #[case(events::LOGIN_RATE_LIMITED, Severity::High)]
    #[case(events::CSRF_TOKEN_INVALID, Severity::High)]
    #[case(events::LOGIN_FAILED, Severity::Medium)]
    #[case(events::CSRF_TOKEN_MISSING, Severity::Medium)]
    #[case(events::LOGIN_SUCCESS, Severity::Low)]
    #[case("SOMETHING_UNKNOWN", Severity::Low)]
    fn test_classification(#[case] event: &str, #[case] expected: Severity) {
        assert_eq!(Severity::classify(event), expected);
    }

    #[test]
    fn test_event_reaches_sink_with_classification() {
        let mut sink = MockAuditSink::new();
        sink.expect_emit()
            .withf(|e| {
                e.event == events::LOGIN_FAILED
                    && e.severity == Severity::Medium
                    && e.user_id.as_deref() == Some("u1")
                    && e.details["email"] == "a@example.com"
            })
            .times(1)
            .returning(|_| Ok(()));

        let log = AuditLog::new(Arc::new(sink), 10);
        log.log_security_event(
            events::LOGIN_FAILED,
            Some("u1"),
            Some(json!({ "email": "a@example.com" })),
        );
        assert_eq!(log.count(Severity::Medium), 1);
    }

    #[test]
    fn test_sink_error_is_swallowed() {
        let mut sink = MockAuditSink::new();
        sink.expect_emit()
            .returning(|_| Err(anyhow::anyhow!("monitoring endpoint unreachable")));

        let log = AuditLog::new(Arc::new(sink), 10);
        log.log_security_event(events::DEVICE_MISMATCH, None, None);

        assert_eq!(log.recent_events(10, None).len(), 1);
        assert_eq!(log.count(Severity::Critical), 1);
    }

    #[test]
    fn test_sink_panic_is_swallowed() {
        struct PanickingSink;
        impl AuditSink for PanickingSink {
            fn emit(&self, _: &SecurityEvent) -> anyhow::Result<()> {
                panic!("sink blew up");
            }
        }

        let log = AuditLog::new(Arc::new(PanickingSink), 10);
        log.log_security_event(events::LOGIN_FAILED, Some("u1"), None);
        log.log_security_event(events::LOGIN_FAILED, Some("u1"), None);
        assert_eq!(log.total(), 2);
    }

    #[test]
    fn test_history_is_bounded_and_newest_first() {
        let log = AuditLog::new(Arc::new(TracingAuditSink::production()), 3);
        for event in ["A", "B", "C", "D"] {
            log.log_security_event(event, None, None);
        }

        let names: Vec<_> = log
            .recent_events(10, None)
            .into_iter()
            .map(|e| e.event)
            .collect();
        assert_eq!(names, vec!["D", "C", "B"]);
    }

    #[test]
    fn test_recent_events_severity_filter() {
        let log = AuditLog::new(Arc::new(TracingAuditSink::development()), 10);
        log.log_security_event(events::LOGIN_SUCCESS, None, None);
        log.log_security_event(events::CSRF_TOKEN_INVALID, None, None);
        log.log_security_event(events::LOGIN_FAILED, None, None);

        let high = log.recent_events(10, Some(Severity::High));
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].event, events::CSRF_TOKEN_INVALID);
    }
}
