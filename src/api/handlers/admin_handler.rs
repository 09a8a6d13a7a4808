use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use tracing::info;

use crate::{
    api::{app_state::AppState, dto::admin_dto::*},
    error::AppError,
};

pub async fn security_events(
    State(state): State<AppState>,
    Query(params): Query<SecurityEventsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = params.limit.unwrap_or(50).min(MAX_EVENTS_PER_PAGE);
    let audit = state.security.audit();

    Ok(Json(SecurityEventsResponse {
        events: audit.recent_events(limit, params.severity),
        total: audit.total(),
    }))
}

pub async fn sweep_sessions(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let report = state.security.sweep_expired_sessions().await?;
    info!(?report, "Manual session sweep finished");
    Ok(Json(report))
}
