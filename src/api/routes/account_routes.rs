//! Account Routes
//!
//! 账号敏感操作，走 `sensitive` 链。

use crate::api::handlers::account_handler::*;
use axum::{Router, routing::post};

use crate::api::app_state::AppState;
use crate::security::middleware::{Guard, GuardContext, MiddlewareChain, apply_chain, apply_guards};

/// 创建账号路由器
pub fn create_account_router(state: &AppState) -> Router<AppState> {
    let ctx = GuardContext::new(
        state.security.clone(),
        state.users.clone(),
        MiddlewareChain::Sensitive,
    );
    let password_route = apply_guards(
        Router::new().route("/account/password", post(change_password)),
        &[Guard::PasswordStrength],
        &ctx,
    );

    let router = Router::new()
        .merge(password_route)
        .route("/account/logout-all", post(logout_all));

    apply_chain(
        router,
        MiddlewareChain::Sensitive,
        state.security.clone(),
        state.users.clone(),
    )
}
