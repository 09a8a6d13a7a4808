use crate::config::config::{AppConfig, StorageBackend};
use crate::security::config::MAX_DURATION_SECS;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::{Path, PathBuf};

/// 环境变量前缀，嵌套字段用 `__` 分隔，例如 `FITGUARD_SECURITY__SESSION_TIMEOUT_SECS`
pub const ENV_PREFIX: &str = "FITGUARD_";

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从默认路径加载配置
    ///
    /// 搜索顺序：
    /// 1. 内置开发环境默认值
    /// 2. ./fitguard.toml（可通过 `FITGUARD_CONFIG` 指定）
    /// 3. 环境变量
    pub fn load() -> Result<AppConfig, figment::Error> {
        let path = std::env::var("FITGUARD_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_config_path());
        Self::load_from(path)
    }

    /// 从指定路径加载配置
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig, figment::Error> {
        Figment::from(Serialized::defaults(AppConfig::development()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// 验证配置
    pub fn validate(config: &AppConfig) -> Result<(), ConfigValidationError> {
        if config.server.port == 0 {
            return Err(ConfigValidationError::InvalidPort);
        }

        let security = &config.security;
        if security.access_token_expiry_secs == 0 || security.session_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidDuration(
                "session lifetimes".into(),
            ));
        }

        let lifetimes = [
            ("access_token_expiry_secs", security.access_token_expiry_secs),
            ("session_timeout_secs", security.session_timeout_secs),
            (
                "refresh_token_expiry_days",
                security.refresh_token_expiry_days.saturating_mul(24 * 60 * 60),
            ),
            ("login_attempt_window_secs", security.login_attempt_window_secs),
            ("sweep_interval_secs", security.sweep_interval_secs),
        ];
        for (name, secs) in lifetimes {
            if secs > MAX_DURATION_SECS {
                return Err(ConfigValidationError::DurationTooLong(name.to_string()));
            }
        }

        if security.token_bytes < 16 {
            return Err(ConfigValidationError::TokenTooShort(security.token_bytes));
        }

        if security.max_login_attempts == 0 || security.login_attempt_window_secs == 0 {
            return Err(ConfigValidationError::InvalidDuration(
                "login attempt limits".into(),
            ));
        }

        let limits = &security.rate_limits;
        for (name, policy) in [
            ("auth", limits.auth),
            ("protected", limits.protected),
            ("admin", limits.admin),
            ("sensitive", limits.sensitive),
        ] {
            if policy.max_requests == 0
                || policy.window_secs == 0
                || policy.window_secs > MAX_DURATION_SECS
            {
                return Err(ConfigValidationError::InvalidRateLimit(name.to_string()));
            }
        }

        if config.storage.backend == StorageBackend::File && config.storage.path.is_none() {
            return Err(ConfigValidationError::InvalidPath(
                "file storage backend requires storage.path".into(),
            ));
        }

        Ok(())
    }
}

/// 配置验证错误
#[derive(thiserror::Error, Debug)]
pub enum ConfigValidationError {
    #[error("服务端口无效，必须大于 0")]
    InvalidPort,

    #[error("时间配置无效: {0} 必须大于 0")]
    InvalidDuration(String),

    #[error("时间配置无效: {0} 超过上限")]
    DurationTooLong(String),

    #[error("令牌长度过短: {0} 字节，至少 16 字节")]
    TokenTooShort(usize),

    #[error("限流策略无效: {0}")]
    InvalidRateLimit(String),

    #[error("配置路径无效: {0}")]
    InvalidPath(String),
}

/// 获取默认配置文件路径
pub fn default_config_path() -> PathBuf {
    PathBuf::from("fitguard.toml")
}
