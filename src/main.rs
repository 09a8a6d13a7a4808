use anyhow::Context;
use fitguard::api::{self, app_state::AppState};
use fitguard::config::{AppConfig, ConfigLoader};
use fitguard::lifecycle::{Shutdown, wait_for_signal};
use fitguard::observability::{HealthCheckResult, ObservabilityState, SecurityMetrics, init_tracing};
use fitguard::security::{SecurityService, TracingAuditSink, rbac::Role};
use fitguard::storage::StorageFactory;
use fitguard::storage::users::{InMemoryUserDirectory, UserDirectory, UserRecord};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load().context("failed to load configuration")?;
    ConfigLoader::validate(&config).context("invalid configuration")?;

    let _log_guard = init_tracing(&config.app_name, &config.logging);
    info!(environment = %config.environment, "Starting FitGuard...");

    let token_store = StorageFactory::create(&config.storage).await?;
    let metrics = Arc::new(SecurityMetrics::default());
    let audit_sink = if config.is_development() {
        TracingAuditSink::development()
    } else {
        TracingAuditSink::production()
    };
    let security = Arc::new(SecurityService::new(
        config.security.clone(),
        token_store.clone(),
        Arc::new(audit_sink),
        metrics.clone(),
    ));
    info!("Security service initialized");

    let users: Arc<dyn UserDirectory> = Arc::new(InMemoryUserDirectory::new());
    seed_admin(&config, &security, users.as_ref()).await?;

    let observability_state = Arc::new(ObservabilityState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        metrics,
    ));
    let started = Instant::now();
    let storage_healthy = StorageFactory::health_check(token_store.as_ref())
        .await
        .unwrap_or(false);
    observability_state
        .add_health_check(HealthCheckResult {
            name: "token_store".into(),
            healthy: storage_healthy,
            message: format!("{} backend", token_store.backend_name()),
            latency_ms: started.elapsed().as_millis() as u64,
        })
        .await;

    let shutdown = Shutdown::new();
    let sweeper = security.spawn_session_sweeper(shutdown.subscribe());

    let router = api::create_app(AppState::new(security, users), observability_state)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!("Server listening on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        wait_for_signal().await;
        shutdown.trigger();
    })
    .await?;

    if let Err(e) = sweeper.await {
        warn!("Session sweeper ended abnormally: {}", e);
    }
    info!("FitGuard stopped");

    Ok(())
}

/// 按配置写入管理员账号
async fn seed_admin(
    config: &AppConfig,
    security: &SecurityService,
    users: &dyn UserDirectory,
) -> anyhow::Result<()> {
    let Some(admin) = &config.bootstrap_admin else {
        return Ok(());
    };

    let email = admin.email.trim().to_lowercase();
    if users.get_user_by_email(&email).await?.is_some() {
        return Ok(());
    }

    let assessment = security.validate_password_strength(&admin.password);
    if !assessment.is_valid {
        anyhow::bail!(
            "bootstrap admin password is too weak: {}",
            assessment.errors.join("; ")
        );
    }

    let hashed = security.hash_password(&admin.password, None).await?;
    users
        .insert_user(UserRecord {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.clone(),
            role: Role::Admin,
            password_hash: hashed.hash,
            password_salt: hashed.salt,
        })
        .await?;
    info!(email = %email, "Bootstrap admin created");

    Ok(())
}
