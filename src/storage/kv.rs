//! 持久化键值存储
//!
//! 刷新令牌索引需要在访问令牌轮换之后继续存在，因此放在独立的键值存储中。
//! 提供两种实现：进程内存储（对应 Web 端 localStorage）和 JSON 文件存储
//! （对应原生端安全存储），启动时由 [`crate::storage::StorageFactory`] 选择。

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};

/// 平台键值存储接口
#[async_trait]
pub trait PlatformKeyValueStore: Send + Sync {
    /// 读取键
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// 写入键（覆盖）
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// 删除键并返回旧值；同一个键只有一个调用方能拿到旧值
    async fn remove(&self, key: &str) -> Result<Option<String>>;

    /// 按前缀枚举键
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// 后端名称
    fn backend_name(&self) -> &'static str;
}

/// 进程内键值存储
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: DashMap<String, String>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlatformKeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.remove(key).map(|(_, v)| v))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// JSON 文件键值存储
///
/// 所有键保存在一个 JSON 对象中，每次写入先写临时文件再原子替换。
/// 落盘成功后才更新内存副本，写入失败时内存与文件保持一致。
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    entries: Mutex<HashMap<String, String>>,
}

impl FileKeyValueStore {
    /// 打开存储文件，不存在时创建空存储
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let entries = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        tracing::debug!(path = %path.display(), keys = entries.len(), "Opened file key-value store");

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    async fn persist(&self, entries: &HashMap<String, String>) -> Result<()> {
        let json = serde_json::to_vec_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| AppError::Storage(format!("写入 {} 失败: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| AppError::Storage(format!("替换 {} 失败: {}", self.path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl PlatformKeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.lock().await;
        let mut staged = entries.clone();
        staged.insert(key.to_string(), value);
        self.persist(&staged).await?;
        *entries = staged;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().await;
        if !entries.contains_key(key) {
            return Ok(None);
        }
        let mut staged = entries.clone();
        let previous = staged.remove(key);
        self.persist(&staged).await?;
        *entries = staged;
        Ok(previous)
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "file"
    }
}
