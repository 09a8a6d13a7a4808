use axum::{
    Json,
    extract::{Extension, State},
    response::IntoResponse,
};
use serde_json::json;

use crate::{
    api::{app_state::AppState, dto::auth_dto::*},
    error::AppError,
    security::{audit::events, session::Session},
};

/// Change the password and end every session of the user, this one included.
pub async fn change_password(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Json(request): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let security = &state.security;
    let user = state
        .users
        .get_user_by_id(&session.user_id)
        .await?
        .ok_or_else(|| AppError::Authentication("User no longer exists".into()))?;

    let verified = security
        .verify_password(&request.current_password, &user.password_hash, &user.password_salt)
        .await?;
    if !verified {
        security.metrics().record_auth_failure();
        security.log_security_event(
            events::LOGIN_FAILED,
            Some(&user.id),
            Some(json!({ "reason": "current password mismatch on password change" })),
        );
        return Err(AppError::Authentication("Current password is incorrect".into()));
    }

    let hashed = security.hash_password(&request.new_password, None).await?;
    state
        .users
        .update_password(&user.id, hashed.hash, hashed.salt)
        .await?;

    let sessions_invalidated = security.invalidate_all_user_sessions(&user.id).await?;
    security.log_security_event(
        events::PASSWORD_CHANGED,
        Some(&user.id),
        Some(json!({ "sessionsInvalidated": sessions_invalidated })),
    );

    Ok(Json(SessionsInvalidatedResponse {
        sessions_invalidated,
    }))
}

pub async fn logout_all(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> Result<impl IntoResponse, AppError> {
    let sessions_invalidated = state
        .security
        .invalidate_all_user_sessions(&session.user_id)
        .await?;

    Ok(Json(SessionsInvalidatedResponse {
        sessions_invalidated,
    }))
}
