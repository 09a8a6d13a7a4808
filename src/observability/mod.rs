//! 可观测性模块
//!
//! 提供 Prometheus 文本格式指标、结构化日志初始化和健康检查。

use axum::{Json, Router, response::IntoResponse, routing::get};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::config::LoggingConfig;

// ===== Security Metrics =====

/// 安全相关指标
#[derive(Debug, Default)]
pub struct SecurityMetrics {
    pub http_requests_total: AtomicU64,
    pub http_request_duration_ms_sum: AtomicU64,
    pub http_errors_total: AtomicU64,
    pub sessions_active: AtomicUsize,
    pub sessions_created_total: AtomicU64,
    pub sessions_refreshed_total: AtomicU64,
    pub sessions_invalidated_total: AtomicU64,
    pub sessions_swept_total: AtomicU64,
    pub auth_failures_total: AtomicU64,
    pub rate_limited_total: AtomicU64,
    pub csrf_failures_total: AtomicU64,
    pub security_events_total: AtomicU64,
}

impl SecurityMetrics {
    /// 记录 HTTP 请求
    pub fn record_http_request(&self, duration_ms: u64, status: u16) {
        self.http_requests_total.fetch_add(1, Ordering::Relaxed);
        self.http_request_duration_ms_sum
            .fetch_add(duration_ms, Ordering::Relaxed);
        if status >= 400 {
            self.http_errors_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// 更新活跃会话数
    pub fn set_active_sessions(&self, count: usize) {
        self.sessions_active.store(count, Ordering::Relaxed);
    }

    pub fn record_session_created(&self) {
        self.sessions_created_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_refreshed(&self) {
        self.sessions_refreshed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sessions_invalidated(&self, count: usize) {
        self.sessions_invalidated_total
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_sessions_swept(&self, count: usize) {
        self.sessions_swept_total
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limited(&self) {
        self.rate_limited_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_csrf_failure(&self) {
        self.csrf_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_security_event(&self) {
        self.security_events_total.fetch_add(1, Ordering::Relaxed);
    }

    /// 生成 Prometheus 格式指标
    pub fn gather(&self) -> String {
        let requests = self.http_requests_total.load(Ordering::Relaxed);
        format!(
            r#"# HELP http_requests_total Total HTTP requests
# TYPE http_requests_total counter
http_requests_total {}
# HELP http_request_duration_seconds HTTP request duration in seconds
# TYPE http_request_duration_seconds summary
http_request_duration_seconds_sum {}
http_request_duration_seconds_count {}
# HELP http_errors_total Responses with status >= 400
# TYPE http_errors_total counter
http_errors_total {}
# HELP sessions_active Sessions currently held in memory
# TYPE sessions_active gauge
sessions_active {}
# HELP sessions_created_total Sessions issued
# TYPE sessions_created_total counter
sessions_created_total {}
# HELP sessions_refreshed_total Token rotations
# TYPE sessions_refreshed_total counter
sessions_refreshed_total {}
# HELP sessions_invalidated_total Sessions removed by logout or invalidation
# TYPE sessions_invalidated_total counter
sessions_invalidated_total {}
# HELP sessions_swept_total Sessions removed by the expiry sweep
# TYPE sessions_swept_total counter
sessions_swept_total {}
# HELP auth_failures_total Rejected authentication attempts
# TYPE auth_failures_total counter
auth_failures_total {}
# HELP rate_limited_total Requests rejected by a rate limit
# TYPE rate_limited_total counter
rate_limited_total {}
# HELP csrf_failures_total Requests rejected by the CSRF guard
# TYPE csrf_failures_total counter
csrf_failures_total {}
# HELP security_events_total Audit events logged
# TYPE security_events_total counter
security_events_total {}
"#,
            requests,
            self.http_request_duration_ms_sum.load(Ordering::Relaxed) as f64 / 1000.0,
            requests,
            self.http_errors_total.load(Ordering::Relaxed),
            self.sessions_active.load(Ordering::Relaxed),
            self.sessions_created_total.load(Ordering::Relaxed),
            self.sessions_refreshed_total.load(Ordering::Relaxed),
            self.sessions_invalidated_total.load(Ordering::Relaxed),
            self.sessions_swept_total.load(Ordering::Relaxed),
            self.auth_failures_total.load(Ordering::Relaxed),
            self.rate_limited_total.load(Ordering::Relaxed),
            self.csrf_failures_total.load(Ordering::Relaxed),
            self.security_events_total.load(Ordering::Relaxed),
        )
    }
}

// ===== Health Check =====

/// 健康检查状态
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub version: String,
    pub uptime_seconds: f64,
    pub checks: Vec<HealthCheck>,
}

/// 单个健康检查项
#[derive(Debug, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: String,
    pub message: Option<String>,
    pub latency_ms: Option<u64>,
}

/// 健康检查结果
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub name: String,
    pub healthy: bool,
    pub message: String,
    pub latency_ms: u64,
}

/// 可观测性状态
#[derive(Clone)]
pub struct ObservabilityState {
    pub metrics: Arc<SecurityMetrics>,
    pub health_checks: Arc<Mutex<Vec<HealthCheckResult>>>,
    pub start_time: DateTime<Utc>,
    pub version: String,
}

impl ObservabilityState {
    pub fn new(version: String, metrics: Arc<SecurityMetrics>) -> Self {
        Self {
            metrics,
            health_checks: Arc::new(Mutex::new(Vec::new())),
            start_time: Utc::now(),
            version,
        }
    }

    /// 添加健康检查结果，只保留最近 10 条
    pub async fn add_health_check(&self, result: HealthCheckResult) {
        let mut checks = self.health_checks.lock().await;
        checks.push(result);
        if checks.len() > 10 {
            checks.remove(0);
        }
    }

    /// 获取应用正常运行时间
    pub fn uptime_seconds(&self) -> f64 {
        (Utc::now() - self.start_time).num_seconds() as f64
    }
}

fn status_label(healthy: bool) -> String {
    if healthy { "healthy" } else { "unhealthy" }.to_string()
}

// ===== Health Check Handlers =====

/// 获取完整健康状态
pub async fn health_check(
    state: axum::extract::State<Arc<ObservabilityState>>,
) -> impl IntoResponse {
    let checks = state.health_checks.lock().await;
    let all_healthy = checks.iter().all(|c| c.healthy);

    let health_status = HealthStatus {
        status: status_label(all_healthy),
        timestamp: Utc::now().to_rfc3339(),
        version: state.version.clone(),
        uptime_seconds: state.uptime_seconds(),
        checks: checks
            .iter()
            .map(|c| HealthCheck {
                name: c.name.clone(),
                status: status_label(c.healthy),
                message: Some(c.message.clone()),
                latency_ms: Some(c.latency_ms),
            })
            .collect(),
    };

    let status_code = if all_healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health_status))
}

/// 简单存活检查
pub async fn liveness() -> impl IntoResponse {
    "OK"
}

/// Prometheus 指标端点
pub async fn metrics(state: axum::extract::State<Arc<ObservabilityState>>) -> impl IntoResponse {
    (axum::http::StatusCode::OK, state.metrics.gather())
}

/// 版本信息端点
pub async fn version(state: axum::extract::State<Arc<ObservabilityState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "version": state.version,
        "uptime_seconds": state.uptime_seconds(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// 创建可观测性路由
pub fn create_observability_router(state: Arc<ObservabilityState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/live", get(liveness))
        .route("/metrics", get(metrics))
        .route("/version", get(version))
        .with_state(state)
}

// ===== Structured Logging =====

/// 初始化结构化日志
///
/// `RUST_LOG` 优先于配置中的级别。配置了日志目录时额外按天滚动写入文件，
/// 返回的 guard 需要在进程生命周期内保持存活。
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Option<WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},{}", config.level, service_name)));

    let (file_writer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, format!("{}.log", service_name));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };

    let file_layer = file_writer.map(|writer| {
        fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
    });

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    let result = if config.structured {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .try_init()
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already initialised: {}", e);
    }

    guard
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn test_metrics_gather() {
        let metrics = SecurityMetrics::default();
        metrics.record_http_request(100, 200);
        metrics.record_http_request(20, 401);
        metrics.record_session_created();
        metrics.record_rate_limited();
        metrics.set_active_sessions(3);

        let output = metrics.gather();
        assert!(output.contains("http_requests_total 2"));
        assert!(output.contains("http_errors_total 1"));
        assert!(output.contains("sessions_created_total 1"));
        assert!(output.contains("rate_limited_total 1"));
        assert!(output.contains("sessions_active 3"));
    }

    #[tokio::test]
    async fn test_unhealthy_check_returns_503() {
        let state = Arc::new(ObservabilityState::new(
            "0.1.0".into(),
            Arc::new(SecurityMetrics::default()),
        ));
        state
            .add_health_check(HealthCheckResult {
                name: "token_store".into(),
                healthy: false,
                message: "unreachable".into(),
                latency_ms: 3,
            })
            .await;

        let response = create_observability_router(state)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["checks"][0]["name"], "token_store");
    }

    #[tokio::test]
    async fn test_health_checks_keep_last_ten() {
        let state = ObservabilityState::new("0.1.0".into(), Arc::new(SecurityMetrics::default()));
        for i in 0..12 {
            state
                .add_health_check(HealthCheckResult {
                    name: format!("check-{}", i),
                    healthy: true,
                    message: String::new(),
                    latency_ms: 0,
                })
                .await;
        }

        let checks = state.health_checks.lock().await;
        assert_eq!(checks.len(), 10);
        assert_eq!(checks[0].name, "check-2");
    }
}
