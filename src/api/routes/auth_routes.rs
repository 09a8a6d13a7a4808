//! Auth Routes
//!
//! 注册、登录和刷新走 `auth` 链；注销、当前用户和 CSRF 令牌走 `protected` 链。

use crate::api::handlers::auth_handler::*;
use axum::{
    Router,
    routing::{get, post},
};

use crate::api::app_state::AppState;
use crate::security::middleware::{Guard, GuardContext, MiddlewareChain, apply_chain, apply_guards};

/// 创建公开认证路由器
pub fn create_auth_router(state: &AppState) -> Router<AppState> {
    let ctx = GuardContext::new(
        state.security.clone(),
        state.users.clone(),
        MiddlewareChain::Auth,
    );
    let register_route = apply_guards(
        Router::new().route("/auth/register", post(register)),
        &[Guard::PasswordStrength],
        &ctx,
    );

    let router = Router::new()
        .merge(register_route)
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh));

    apply_chain(
        router,
        MiddlewareChain::Auth,
        state.security.clone(),
        state.users.clone(),
    )
}

/// 创建已登录用户路由器
pub fn create_session_router(state: &AppState) -> Router<AppState> {
    let router = Router::new()
        .route("/auth/logout", post(logout))
        .route("/me", get(me))
        .route("/csrf-token", get(csrf_token));

    apply_chain(
        router,
        MiddlewareChain::Protected,
        state.security.clone(),
        state.users.clone(),
    )
}
