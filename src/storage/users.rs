//! 用户目录
//!
//! 会话核心只通过 [`UserDirectory`] 解析身份，不直接持久化用户数据。

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::security::rbac::Role;

/// 用户记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub role: Role,
    pub password_hash: String,
    pub password_salt: String,
}

/// 用户目录接口
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>>;

    /// 新增用户，邮箱已存在时返回验证错误
    async fn insert_user(&self, user: UserRecord) -> Result<()>;

    async fn update_password(&self, id: &str, hash: String, salt: String) -> Result<()>;
}

/// 内存用户目录
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    by_id: DashMap<String, UserRecord>,
    /// 小写邮箱 -> 用户 ID
    by_email: DashMap<String, String>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user_by_id(&self, id: &str) -> Result<Option<UserRecord>> {
        Ok(self.by_id.get(id).map(|u| u.clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let Some(id) = self.by_email.get(&email.to_lowercase()).map(|id| id.clone()) else {
            return Ok(None);
        };
        self.get_user_by_id(&id).await
    }

    async fn insert_user(&self, user: UserRecord) -> Result<()> {
        use dashmap::mapref::entry::Entry;

        match self.by_email.entry(user.email.to_lowercase()) {
            Entry::Occupied(_) => Err(AppError::validation(
                "An account with this email already exists",
                Some("email"),
            )),
            Entry::Vacant(slot) => {
                slot.insert(user.id.clone());
                self.by_id.insert(user.id.clone(), user);
                Ok(())
            }
        }
    }

    async fn update_password(&self, id: &str, hash: String, salt: String) -> Result<()> {
        let mut user = self
            .by_id
            .get_mut(id)
            .ok_or_else(|| AppError::Authentication("User not found".into()))?;
        user.password_hash = hash;
        user.password_salt = salt;
        Ok(())
    }
}
