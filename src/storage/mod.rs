//! 存储层模块
//!
//! 提供刷新令牌索引所用的键值存储以及用户目录。

pub mod factory;
pub mod kv;
pub mod users;

pub use factory::StorageFactory;
pub use kv::{FileKeyValueStore, MemoryKeyValueStore, PlatformKeyValueStore};
pub use users::{InMemoryUserDirectory, UserDirectory, UserRecord};
