//! 存储工厂模块
//!
//! 根据配置创建相应的键值存储实例。

use crate::config::config::{StorageBackend, StorageConfig};
use crate::error::{AppError, Result};
use crate::storage::kv::{FileKeyValueStore, MemoryKeyValueStore, PlatformKeyValueStore};
use std::sync::Arc;

/// 存储工厂
pub struct StorageFactory;

impl StorageFactory {
    /// 根据配置创建键值存储
    pub async fn create(config: &StorageConfig) -> Result<Arc<dyn PlatformKeyValueStore>> {
        let store: Arc<dyn PlatformKeyValueStore> = match config.backend {
            StorageBackend::Memory => Arc::new(MemoryKeyValueStore::new()),
            StorageBackend::File => {
                let path = config.path.clone().ok_or_else(|| {
                    AppError::Config("file storage backend requires storage.path".into())
                })?;
                Arc::new(FileKeyValueStore::open(path).await?)
            }
        };

        tracing::info!(backend = store.backend_name(), "Key-value store initialized");
        Ok(store)
    }

    /// 检查存储是否可用
    pub async fn health_check(store: &dyn PlatformKeyValueStore) -> Result<bool> {
        store.keys_with_prefix("__health__").await.map(|_| true)
    }
}
