//! Security Middleware Module
//!
//! Axum guards for rate limiting, security headers, session authentication,
//! CSRF, device binding, input sanitization and request logging, plus the
//! four named chains that compose them.
//!
//! Guards run in the order listed by [`MiddlewareChain::guards`]; the first
//! entry is the outermost layer.

use axum::{
    Router,
    body::{Body, Bytes, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, Method, Uri, header, request::Parts},
    middleware::{Next, from_fn, from_fn_with_state},
    response::Response,
};
use chrono::Utc;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;

use crate::error::AppError;
use crate::security::audit::events;
use crate::security::config::{RateLimitPolicy, SecuritySettings};
use crate::security::csrf::CSRF_HEADER;
use crate::security::rate_limit::extract_client_ip;
use crate::security::rbac::{Role, authorize_role};
use crate::security::service::SecurityService;
use crate::security::session::Session;
use crate::security::validation::{sanitize_json_value, sanitize_query};
use crate::storage::users::UserDirectory;

/// Header binding a request to a client device
pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// JSON fields checked by the password strength guard
const PASSWORD_FIELDS: [&str; 2] = ["password", "newPassword"];

/// Identity attached by [`authenticate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
}

/// Extension trait for the session context attached to a request
pub trait RequestSessionExt {
    fn authenticated_user(&self) -> Option<&AuthenticatedUser>;
    fn session(&self) -> Option<&Session>;
    fn set_session(&mut self, session: Session);
}

impl RequestSessionExt for Request<Body> {
    fn authenticated_user(&self) -> Option<&AuthenticatedUser> {
        self.extensions().get::<AuthenticatedUser>()
    }

    fn session(&self) -> Option<&Session> {
        self.extensions().get::<Session>()
    }

    fn set_session(&mut self, session: Session) {
        self.extensions_mut().insert(AuthenticatedUser {
            id: session.user_id.clone(),
        });
        self.extensions_mut().insert(session);
    }
}

/// Shared state handed to every guard of a chain
#[derive(Clone)]
pub struct GuardContext {
    pub security: Arc<SecurityService>,
    pub users: Arc<dyn UserDirectory>,
    pub chain: MiddlewareChain,
}

impl GuardContext {
    pub fn new(
        security: Arc<SecurityService>,
        users: Arc<dyn UserDirectory>,
        chain: MiddlewareChain,
    ) -> Self {
        Self {
            security,
            users,
            chain,
        }
    }
}

/// Extract the token from `Authorization: Bearer <token>`
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn is_json(headers: &HeaderMap) -> bool {
    header_str(headers, header::CONTENT_TYPE.as_str())
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"))
        .unwrap_or(false)
}

async fn buffer_body(req: Request, limit: usize) -> Result<(Parts, Bytes), AppError> {
    let (parts, body) = req.into_parts();
    let bytes = to_bytes(body, limit).await.map_err(|_| {
        AppError::validation("Request body is too large or unreadable", Some("body"))
    })?;
    Ok((parts, bytes))
}

fn rebuild(mut parts: Parts, bytes: Bytes) -> Request {
    parts.headers.remove(header::CONTENT_LENGTH);
    Request::from_parts(parts, Body::from(bytes))
}

/// Rate limiting guard keyed by chain and client address
pub async fn rate_limit(
    State(ctx): State<GuardContext>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let settings = ctx.security.settings();
    let policy = ctx.chain.rate_limit_policy(settings);
    let client_ip = extract_client_ip(&req, settings.trust_forwarded_for);
    let key = format!("{}:{}", ctx.chain.name(), client_ip);

    let now = Utc::now();
    let decision =
        ctx.security
            .check_rate_limit_detailed(&key, policy.max_requests, policy.window_secs, now);

    if !decision.allowed {
        ctx.security.metrics().record_rate_limited();
        ctx.security.log_security_event(
            events::RATE_LIMIT_EXCEEDED,
            None,
            Some(json!({
                "chain": ctx.chain.name(),
                "ip": client_ip,
                "path": req.uri().path(),
            })),
        );
        return Err(AppError::RateLimited {
            retry_after: decision.retry_after_secs(now),
        });
    }

    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(policy.max_requests));
    headers.insert(
        "x-ratelimit-remaining",
        HeaderValue::from(decision.attempts_remaining),
    );
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(decision.reset_time.timestamp()),
    );
    Ok(response)
}

/// Security headers guard
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'self'; frame-ancestors 'none'; object-src 'none'"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        "permissions-policy",
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );

    response
}

/// Bearer-token authentication guard
pub async fn authenticate(
    State(ctx): State<GuardContext>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(token) = bearer_token(req.headers()) else {
        ctx.security.metrics().record_auth_failure();
        return Err(AppError::Authentication(
            "Authorization header with Bearer token is required".into(),
        ));
    };

    let Some(session) = ctx.security.validate_session(token) else {
        ctx.security.metrics().record_auth_failure();
        ctx.security.log_security_event(
            events::INVALID_SESSION,
            None,
            Some(json!({ "path": req.uri().path() })),
        );
        return Err(AppError::Authentication("Invalid or expired session".into()));
    };

    let user = AuthenticatedUser {
        id: session.user_id.clone(),
    };
    req.set_session(session);

    let mut response = next.run(req).await;
    response.extensions_mut().insert(user);
    Ok(response)
}

/// Inactivity guard for an already attached session
pub async fn session_timeout(
    State(ctx): State<GuardContext>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session = req
        .session()
        .cloned()
        .ok_or_else(|| AppError::Authentication("No active session".into()))?;

    let now = Utc::now();
    let timeout = ctx.security.settings().session_timeout();

    if session.is_idle_at(timeout, now) || !ctx.security.touch_session_at(&session.access_token, now)
    {
        ctx.security.invalidate_session(&session.access_token).await?;
        ctx.security.log_security_event(
            events::SESSION_TIMEOUT,
            Some(&session.user_id),
            Some(json!({ "lastActivity": session.last_activity })),
        );
        return Err(AppError::Authentication(
            "Session expired due to inactivity".into(),
        ));
    }

    Ok(next.run(req).await)
}

/// CSRF guard; safe methods pass through
pub async fn csrf_protection(
    State(ctx): State<GuardContext>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
        return Ok(next.run(req).await);
    }

    let user_id = req.authenticated_user().map(|u| u.id.clone());

    let Some(token) = header_str(req.headers(), CSRF_HEADER) else {
        ctx.security.metrics().record_csrf_failure();
        ctx.security.log_security_event(
            events::CSRF_TOKEN_MISSING,
            user_id.as_deref(),
            Some(json!({ "method": req.method().as_str(), "path": req.uri().path() })),
        );
        return Err(AppError::csrf_missing());
    };

    let session_token = req
        .session()
        .map(|s| s.access_token.as_str())
        .unwrap_or_default();

    if !ctx.security.validate_csrf_token(token, session_token) {
        ctx.security.metrics().record_csrf_failure();
        ctx.security.log_security_event(
            events::CSRF_TOKEN_INVALID,
            user_id.as_deref(),
            Some(json!({ "method": req.method().as_str(), "path": req.uri().path() })),
        );
        return Err(AppError::csrf_invalid());
    }

    Ok(next.run(req).await)
}

/// Device binding guard: `X-Device-Id` must match the session's device
pub async fn device_verification(
    State(ctx): State<GuardContext>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let session = req
        .session()
        .ok_or_else(|| AppError::Authentication("No active session".into()))?;

    let presented = header_str(req.headers(), DEVICE_ID_HEADER);
    if presented != Some(session.device_id.as_str()) {
        ctx.security.metrics().record_auth_failure();
        ctx.security.log_security_event(
            events::DEVICE_MISMATCH,
            Some(&session.user_id),
            Some(json!({
                "expectedDevice": session.device_id,
                "presentedDevice": presented,
                "path": req.uri().path(),
            })),
        );
        return Err(AppError::Authentication(
            "Device verification failed".into(),
        ));
    }

    Ok(next.run(req).await)
}

/// Role guard, resolving the user's current role through the directory
pub async fn authorize(
    State((ctx, required)): State<(GuardContext, Role)>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = req
        .authenticated_user()
        .cloned()
        .ok_or_else(|| AppError::Authentication("Authentication required".into()))?;

    let record = ctx
        .users
        .get_user_by_id(&user.id)
        .await?
        .ok_or_else(|| AppError::Authentication("User no longer exists".into()))?;

    if let Err(e) = authorize_role(record.role, required) {
        let event = if required.is_admin() {
            events::ADMIN_ACCESS_DENIED
        } else {
            events::PRIVILEGE_ESCALATION_ATTEMPT
        };
        ctx.security.log_security_event(
            event,
            Some(&user.id),
            Some(json!({
                "role": record.role,
                "required": required,
                "path": req.uri().path(),
            })),
        );
        return Err(e);
    }

    Ok(next.run(req).await)
}

/// Strip markup from JSON bodies and query strings
pub async fn sanitize_input(
    State(ctx): State<GuardContext>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if let Some(query) = req.uri().query() {
        let cleaned = sanitize_query(query);
        if cleaned != query {
            let path = req.uri().path();
            let rebuilt = if cleaned.is_empty() {
                path.to_string()
            } else {
                format!("{}?{}", path, cleaned)
            };
            let mut parts = req.uri().clone().into_parts();
            parts.path_and_query = Some(
                rebuilt
                    .parse()
                    .map_err(|_| AppError::validation("Malformed query string", Some("query")))?,
            );
            *req.uri_mut() = Uri::from_parts(parts)
                .map_err(|_| AppError::validation("Malformed query string", Some("query")))?;
        }
    }

    if !is_json(req.headers()) {
        return Ok(next.run(req).await);
    }

    let (parts, bytes) = buffer_body(req, ctx.security.settings().max_request_size).await?;
    let bytes = match serde_json::from_slice::<Value>(&bytes) {
        Ok(mut value) => {
            sanitize_json_value(&mut value);
            Bytes::from(serde_json::to_vec(&value)?)
        }
        // Malformed JSON is left for the handler's extractor to reject
        Err(_) => bytes,
    };

    Ok(next.run(rebuild(parts, bytes)).await)
}

/// Reject weak values in `password` / `newPassword` before the handler runs
pub async fn password_strength(
    State(ctx): State<GuardContext>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if !is_json(req.headers()) {
        return Ok(next.run(req).await);
    }

    let user_id = req.authenticated_user().map(|u| u.id.clone());
    let (parts, bytes) = buffer_body(req, ctx.security.settings().max_request_size).await?;

    if let Ok(Value::Object(body)) = serde_json::from_slice::<Value>(&bytes) {
        for field in PASSWORD_FIELDS {
            if let Some(Value::String(password)) = body.get(field) {
                let assessment = ctx.security.validate_password_strength(password);
                if !assessment.is_valid {
                    ctx.security.log_security_event(
                        events::WEAK_PASSWORD_REJECTED,
                        user_id.as_deref(),
                        Some(json!({ "score": assessment.score, "path": parts.uri.path() })),
                    );
                    return Err(AppError::weak_password(&assessment.errors));
                }
            }
        }
    }

    Ok(next.run(rebuild(parts, bytes)).await)
}

/// Structured request log; auth traffic and failures also go to the audit log
pub async fn request_logger(
    State(ctx): State<GuardContext>,
    req: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let client_ip = extract_client_ip(&req, ctx.security.settings().trust_forwarded_for);

    let response = next.run(req).await;

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as u64;
    let user_id = response
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|u| u.id.clone());

    tracing::info!(
        chain = ctx.chain.name(),
        method = %method,
        path = %path,
        status,
        latency_ms,
        client_ip = %client_ip,
        user_id = user_id.as_deref().unwrap_or("-"),
        "Request completed"
    );
    ctx.security
        .metrics()
        .record_http_request(latency_ms, status);

    if status >= 400 || path.contains("/auth/") {
        let event = if status >= 400 {
            events::HTTP_ERROR
        } else {
            events::AUTH_REQUEST
        };
        ctx.security.log_security_event(
            event,
            user_id.as_deref(),
            Some(json!({
                "method": method.as_str(),
                "path": path,
                "status": status,
                "latencyMs": latency_ms,
                "ip": client_ip,
            })),
        );
    }

    response
}

/// Individual guard, used to describe chains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    SecurityHeaders,
    RequestLogger,
    RateLimit,
    SanitizeInput,
    Authenticate,
    SessionTimeout,
    CsrfProtection,
    Authorize(Role),
    DeviceVerification,
    PasswordStrength,
}

/// Named guard chains, in increasing strictness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MiddlewareChain {
    Auth,
    Protected,
    Admin,
    Sensitive,
}

impl MiddlewareChain {
    pub fn name(&self) -> &'static str {
        match self {
            MiddlewareChain::Auth => "auth",
            MiddlewareChain::Protected => "protected",
            MiddlewareChain::Admin => "admin",
            MiddlewareChain::Sensitive => "sensitive",
        }
    }

    pub fn rate_limit_policy(&self, settings: &SecuritySettings) -> RateLimitPolicy {
        let limits = &settings.rate_limits;
        match self {
            MiddlewareChain::Auth => limits.auth,
            MiddlewareChain::Protected => limits.protected,
            MiddlewareChain::Admin => limits.admin,
            MiddlewareChain::Sensitive => limits.sensitive,
        }
    }

    /// Guards of this chain, outermost first
    pub fn guards(&self) -> Vec<Guard> {
        let mut guards = vec![
            Guard::SecurityHeaders,
            Guard::RequestLogger,
            Guard::RateLimit,
            Guard::SanitizeInput,
        ];

        if *self == MiddlewareChain::Auth {
            return guards;
        }

        guards.extend([
            Guard::Authenticate,
            Guard::SessionTimeout,
            Guard::CsrfProtection,
        ]);

        match self {
            MiddlewareChain::Admin => {
                guards.extend([Guard::Authorize(Role::Admin), Guard::DeviceVerification])
            }
            MiddlewareChain::Sensitive => guards.push(Guard::DeviceVerification),
            _ => {}
        }

        guards
    }
}

/// Wrap `router` in a single guard
pub fn apply_guard<S>(router: Router<S>, guard: Guard, ctx: &GuardContext) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let ctx = ctx.clone();
    match guard {
        Guard::SecurityHeaders => router.layer(from_fn(security_headers)),
        Guard::RequestLogger => router.layer(from_fn_with_state(ctx, request_logger)),
        Guard::RateLimit => router.layer(from_fn_with_state(ctx, rate_limit)),
        Guard::SanitizeInput => router.layer(from_fn_with_state(ctx, sanitize_input)),
        Guard::Authenticate => router.layer(from_fn_with_state(ctx, authenticate)),
        Guard::SessionTimeout => router.layer(from_fn_with_state(ctx, session_timeout)),
        Guard::CsrfProtection => router.layer(from_fn_with_state(ctx, csrf_protection)),
        Guard::Authorize(role) => router.layer(from_fn_with_state((ctx, role), authorize)),
        Guard::DeviceVerification => router.layer(from_fn_with_state(ctx, device_verification)),
        Guard::PasswordStrength => router.layer(from_fn_with_state(ctx, password_strength)),
    }
}

/// Wrap `router` in `guards`; the first guard ends up outermost.
pub fn apply_guards<S>(router: Router<S>, guards: &[Guard], ctx: &GuardContext) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    guards
        .iter()
        .rev()
        .fold(router, |router, guard| apply_guard(router, *guard, ctx))
}

/// Wrap `router` in one of the named chains.
pub fn apply_chain<S>(
    router: Router<S>,
    chain: MiddlewareChain,
    security: Arc<SecurityService>,
    users: Arc<dyn UserDirectory>,
) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let ctx = GuardContext::new(security, users, chain);
    apply_guards(router, &chain.guards(), &ctx)
}
