//! API 模块
//!
//! 提供 REST API 支持。

#[cfg(test)]
mod api_tests;
pub mod app_state;
pub mod dto;
pub mod handlers;
pub mod routes;

use crate::api::app_state::AppState;
use crate::observability::{ObservabilityState, create_observability_router};
use crate::security::middleware::security_headers;
use axum::{Router, middleware::from_fn};
use std::sync::Arc;

pub fn create_router(app_state: AppState) -> Router {
    let api = Router::new()
        .merge(routes::auth_routes::create_auth_router(&app_state))
        .merge(routes::auth_routes::create_session_router(&app_state))
        .merge(routes::account_routes::create_account_router(&app_state))
        .merge(routes::admin_routes::create_admin_router(&app_state));

    Router::new().nest("/api/v1", api).with_state(app_state)
}

/// 组装完整应用：观测路由 + API 路由
///
/// 安全响应头挂在最外层，健康检查、指标以及未匹配路径的 404 同样带上。
pub fn create_app(app_state: AppState, observability: Arc<ObservabilityState>) -> Router {
    create_observability_router(observability)
        .merge(create_router(app_state))
        .layer(from_fn(security_headers))
}
