//! 错误处理模块
//!
//! 定义应用程序的错误类型、错误码映射以及 HTTP 错误响应。

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用程序错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 认证错误
    #[error("{0}")]
    Authentication(String),

    /// 授权错误
    #[error("{0}")]
    Authorization(String),

    /// 速率限制
    #[error("Too many requests, retry in {retry_after} seconds")]
    RateLimited {
        /// 距离窗口重置的秒数
        retry_after: u64,
    },

    /// 参数验证错误
    #[error("{message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    /// 带自定义错误码的安全错误（CSRF、弱密码等）
    #[error("{message}")]
    Security {
        code: &'static str,
        message: String,
        status: u16,
    },

    /// 存储错误
    #[error("存储错误: {0}")]
    Storage(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl AppError {
    /// 创建验证错误
    pub fn validation(message: impl Into<String>, field: Option<&str>) -> Self {
        AppError::Validation {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    pub fn csrf_missing() -> Self {
        AppError::Security {
            code: "CSRF_TOKEN_MISSING",
            message: "CSRF token is required".to_string(),
            status: 403,
        }
    }

    pub fn csrf_invalid() -> Self {
        AppError::Security {
            code: "CSRF_TOKEN_INVALID",
            message: "Invalid CSRF token".to_string(),
            status: 403,
        }
    }

    /// 弱密码错误，消息中带上所有未满足的规则
    pub fn weak_password(errors: &[String]) -> Self {
        AppError::Security {
            code: "WEAK_PASSWORD",
            message: format!("Password does not meet requirements: {}", errors.join(", ")),
            status: 400,
        }
    }

    /// 错误码
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Authentication(_) => "AUTHENTICATION_ERROR",
            AppError::Authorization(_) => "AUTHORIZATION_ERROR",
            AppError::RateLimited { .. } => "RATE_LIMIT_EXCEEDED",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::Security { code, .. } => code,
            AppError::Storage(_) => "STORAGE_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Internal(_) | AppError::Io(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Authentication(_) => 401,
            AppError::Authorization(_) => 403,
            AppError::RateLimited { .. } => 429,
            AppError::Validation { .. } => 400,
            AppError::Security { status, .. } => *status,
            _ => 500,
        }
    }

    /// 是否为可预期的业务错误（可直接返回给客户端）
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            AppError::Authentication(_)
                | AppError::Authorization(_)
                | AppError::RateLimited { .. }
                | AppError::Validation { .. }
                | AppError::Security { .. }
        )
    }

    /// 返回给客户端的消息，基础设施错误不暴露内部细节
    pub fn public_message(&self) -> String {
        if self.is_operational() {
            self.to_string()
        } else {
            "An unexpected error occurred".to_string()
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("blocking task failed: {}", e))
    }
}

/// Axum response implementation for AppError
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if !self.is_operational() {
            tracing::error!(code = self.code(), error = %self, "Unhandled internal error");
        }

        let body = Json(ErrorResponse::new(
            self.code(),
            &self.public_message(),
            status,
        ));
        let mut response = (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
        )
            .into_response();

        if let AppError::RateLimited { retry_after } = self {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

/// 错误响应
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// 错误响应主体
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// 错误代码
    pub code: String,
    /// 错误消息
    pub message: String,
    /// HTTP 状态码
    pub status_code: u16,
    /// 发生时间 (RFC 3339)
    pub timestamp: String,
}

impl ErrorResponse {
    /// 创建新错误响应
    pub fn new(code: &str, message: &str, status_code: u16) -> Self {
        Self {
            error: ErrorBody {
                code: code.to_string(),
                message: message.to_string(),
                status_code,
                timestamp: Utc::now().to_rfc3339(),
            },
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[test]
    fn test_status_and_code_mapping() {
        let cases = vec![
            (AppError::Authentication("x".into()), 401, "AUTHENTICATION_ERROR"),
            (AppError::Authorization("x".into()), 403, "AUTHORIZATION_ERROR"),
            (AppError::RateLimited { retry_after: 5 }, 429, "RATE_LIMIT_EXCEEDED"),
            (AppError::validation("bad", Some("email")), 400, "VALIDATION_ERROR"),
            (AppError::csrf_missing(), 403, "CSRF_TOKEN_MISSING"),
            (AppError::csrf_invalid(), 403, "CSRF_TOKEN_INVALID"),
            (AppError::weak_password(&["too short".into()]), 400, "WEAK_PASSWORD"),
            (AppError::Internal("rng".into()), 500, "INTERNAL_ERROR"),
        ];

        for (err, status, code) in cases {
            assert_eq!(err.status_code(), status);
            assert_eq!(err.code(), code);
        }
    }

    #[test]
    fn test_operational_flag() {
        assert!(AppError::Authentication("x".into()).is_operational());
        assert!(AppError::csrf_invalid().is_operational());
        assert!(!AppError::Internal("x".into()).is_operational());
        assert!(!AppError::Storage("x".into()).is_operational());
    }

    #[tokio::test]
    async fn test_internal_error_body_hides_details() {
        let response = AppError::Internal("rng exploded at 0xdeadbeef".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
        assert_eq!(body["error"]["statusCode"], 500);
        assert!(!body["error"]["message"].as_str().unwrap().contains("deadbeef"));
        assert!(body["error"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let response = AppError::RateLimited { retry_after: 42 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "42");
    }
}
