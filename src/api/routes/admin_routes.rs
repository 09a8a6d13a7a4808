//! Admin Routes

use crate::api::handlers::admin_handler::*;
use axum::{
    Router,
    routing::{get, post},
};

use crate::api::app_state::AppState;
use crate::security::middleware::{MiddlewareChain, apply_chain};

/// 创建管理路由器
pub fn create_admin_router(state: &AppState) -> Router<AppState> {
    let router = Router::new()
        .route("/admin/security-events", get(security_events))
        .route("/admin/sessions/sweep", post(sweep_sessions));

    apply_chain(
        router,
        MiddlewareChain::Admin,
        state.security.clone(),
        state.users.clone(),
    )
}
