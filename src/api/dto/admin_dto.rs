//! 管理 DTO

use serde::{Deserialize, Serialize};

use crate::security::audit::{SecurityEvent, Severity};

/// 单次查询返回的最大事件数
pub const MAX_EVENTS_PER_PAGE: usize = 200;

/// 安全事件查询参数
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SecurityEventsQuery {
    /// 返回条数，默认 50
    pub limit: Option<usize>,
    /// 最低严重级别
    pub severity: Option<Severity>,
}

/// 安全事件列表响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEventsResponse {
    /// 最新的在前
    pub events: Vec<SecurityEvent>,
    /// 进程启动以来记录的事件总数
    pub total: u64,
}
