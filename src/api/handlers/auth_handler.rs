use axum::{
    Json,
    extract::{Extension, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::{
    api::{app_state::AppState, dto::auth_dto::*},
    error::AppError,
    security::{
        audit::events,
        middleware::{AuthenticatedUser, DEVICE_ID_HEADER},
        rbac::Role,
        session::Session,
        validation::RequestValidator,
    },
    storage::users::UserRecord,
};

/// 客户端未提供设备 ID 时分配一个新的
fn device_id(headers: &HeaderMap) -> String {
    headers
        .get(DEVICE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = normalize_email(&request.email);
    let validator = RequestValidator::new();
    validator.validate_email("email", &email)?;
    validator.validate_required("password", &request.password)?;

    debug!("Registering user: {}", email);

    let security = &state.security;
    let hashed = security.hash_password(&request.password, None).await?;
    let user = UserRecord {
        id: Uuid::new_v4().to_string(),
        email,
        role: Role::User,
        password_hash: hashed.hash,
        password_salt: hashed.salt,
    };
    state.users.insert_user(user.clone()).await?;

    let session = security.create_session(&user.id, &device_id(&headers)).await?;
    security.log_security_event(
        events::USER_REGISTERED,
        Some(&user.id),
        Some(json!({ "deviceId": session.device_id })),
    );

    Ok((StatusCode::CREATED, Json(AuthResponse::new(&user, &session))))
}

pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let email = normalize_email(&request.email);
    let security = &state.security;

    let decision = security.check_login_attempts(&email);
    if !decision.allowed {
        return Err(AppError::RateLimited {
            retry_after: decision.retry_after_secs(Utc::now()),
        });
    }

    let user = state.users.get_user_by_email(&email).await?;
    let verified = match &user {
        Some(user) => {
            security
                .verify_password(&request.password, &user.password_hash, &user.password_salt)
                .await?
        }
        None => false,
    };

    let Some(user) = user.filter(|_| verified) else {
        security.metrics().record_auth_failure();
        security.log_security_event(
            events::LOGIN_FAILED,
            None,
            Some(json!({
                "email": email,
                "attemptsRemaining": decision.attempts_remaining,
            })),
        );
        return Err(AppError::Authentication("Invalid email or password".into()));
    };

    security.reset_login_attempts(&email);
    let session = security.create_session(&user.id, &device_id(&headers)).await?;
    security.log_security_event(
        events::LOGIN_SUCCESS,
        Some(&user.id),
        Some(json!({ "deviceId": session.device_id })),
    );

    Ok(Json(AuthResponse::new(&user, &session)))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state
        .security
        .refresh_session(&request.refresh_token)
        .await?
        .ok_or_else(|| AppError::Authentication("Refresh token is invalid or expired".into()))?;

    Ok(Json(SessionResponse::from(&session)))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<impl IntoResponse, AppError> {
    state.security.invalidate_session(&session.access_token).await?;
    state.security.log_security_event(
        events::LOGOUT,
        Some(&session.user_id),
        Some(json!({ "deviceId": session.device_id })),
    );

    Ok(StatusCode::NO_CONTENT)
}

pub async fn me(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .users
        .get_user_by_id(&user.id)
        .await?
        .ok_or_else(|| AppError::Authentication("User no longer exists".into()))?;

    Ok(Json(UserResponse::from(&record)))
}

pub async fn csrf_token(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let csrf_token = state.security.generate_csrf_token().await?;
    Ok(Json(CsrfTokenResponse { csrf_token }))
}
