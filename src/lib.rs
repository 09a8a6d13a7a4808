//! FitGuard - 健身应用后端的会话与请求安全核心
//!
//! 负责会话签发与过期、固定窗口限流、凭据工具、CSRF 校验、
//! 按路由分组的安全中间件链以及安全审计日志。

pub mod api;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod security;
pub mod storage;
