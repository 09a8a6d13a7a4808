//! Security Module
//!
//! Session and request security for the FitGuard API:
//! - Session issuance, validation, rotation and expiry sweep
//! - Fixed-window rate limiting (per chain and per login email)
//! - Secure tokens, salted password digests and strength scoring
//! - CSRF tokens
//! - Security audit log
//! - Axum guard chains (`auth`, `protected`, `admin`, `sensitive`)

pub mod audit;
pub mod config;
pub mod credentials;
pub mod csrf;
pub mod middleware;
pub mod rate_limit;
pub mod rbac;
pub mod service;
pub mod session;
pub mod validation;


pub use audit::{AuditLog, AuditSink, SecurityEvent, Severity, TracingAuditSink};
pub use config::{ChainRateLimits, MAX_DURATION_SECS, RateLimitPolicy, SecuritySettings};
pub use credentials::{PasswordAssessment, PasswordHash};
pub use middleware::{AuthenticatedUser, Guard, GuardContext, MiddlewareChain, apply_chain};
pub use rate_limit::{RateLimitDecision, RateLimitEntry, RateLimiter};
pub use rbac::Role;
pub use service::{RefreshTokenRecord, SecurityService, SweepReport};
pub use session::{Session, SessionStore};
pub use validation::RequestValidator;
