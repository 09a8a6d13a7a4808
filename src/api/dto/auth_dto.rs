//! 认证 DTO
//!
//! 定义注册、登录、刷新和账号相关的请求和响应数据结构。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::security::rbac::Role;
use crate::security::session::Session;
use crate::storage::users::UserRecord;

/// 注册请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
}

/// 登录请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// 刷新令牌请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// 修改密码请求
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// 用户信息响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub email: String,
    pub role: Role,
}

impl From<&UserRecord> for UserResponse {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

/// 会话令牌响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// 访问令牌的硬过期时间
    pub expires_at: DateTime<Utc>,
    /// 后续敏感操作需要通过 `X-Device-Id` 回传
    pub device_id: String,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        Self {
            access_token: session.access_token.clone(),
            refresh_token: session.refresh_token.clone(),
            expires_at: session.expires_at,
            device_id: session.device_id.clone(),
        }
    }
}

/// 注册/登录响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: UserResponse,
    pub session: SessionResponse,
}

impl AuthResponse {
    pub fn new(user: &UserRecord, session: &Session) -> Self {
        Self {
            user: user.into(),
            session: session.into(),
        }
    }
}

/// CSRF 令牌响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsrfTokenResponse {
    pub csrf_token: String,
}

/// 批量注销响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionsInvalidatedResponse {
    pub sessions_invalidated: usize,
}
