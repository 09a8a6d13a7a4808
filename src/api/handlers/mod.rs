//! Handlers 模块
//!
//! HTTP 请求处理程序。

pub mod account_handler;
pub mod admin_handler;
pub mod auth_handler;

pub use account_handler::*;
pub use admin_handler::*;
pub use auth_handler::*;
