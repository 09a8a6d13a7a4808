//! Routes 模块
//!
//! 定义 API 路由，每组路由挂在各自的安全链上。

pub mod account_routes;
pub mod admin_routes;
pub mod auth_routes;
