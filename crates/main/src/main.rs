//! 主应用程序入口
//!
//! 加载配置，选择存储后端，启动在线状态清扫器和 Axum Web API 服务。

use std::sync::Arc;

use anyhow::Context;
use application::{
    PresenceSweeper, SessionService, SessionServiceDependencies, SweeperSettings, SystemClock,
};
use config::{AppConfig, PresenceConfig};
use infrastructure::Storage;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

fn sweeper_settings(presence: &PresenceConfig) -> SweeperSettings {
    SweeperSettings {
        interval: presence.sweep_interval(),
        expiry_threshold: presence.expiry_threshold(),
        eviction_timeout: presence.eviction_timeout(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，未设置 RUST_LOG 时默认 info
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    tracing::info!(config = %config.sanitize(), "configuration loaded");

    let storage = Storage::connect(&config.storage)
        .await
        .context("failed to initialise storage")?;

    let service = Arc::new(SessionService::new(SessionServiceDependencies {
        registry: storage.registry,
        message_log: storage.message_log,
        clock: Arc::new(SystemClock),
    }));

    let sweeper = PresenceSweeper::new(service.clone(), sweeper_settings(&config.presence)).spawn();

    let app = router(AppState::new(service), &config.server.cors_origins);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    tracing::info!("聊天中继服务启动在 http://{}", addr);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // 当前清扫周期结束后才退出
    sweeper.shutdown().await;
    tracing::info!("服务已停止");

    served.context("server error")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig_term) => {
                sig_term.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("接收到 Ctrl+C 信号，开始优雅停机..."),
        _ = terminate => tracing::info!("接收到终止信号，开始优雅停机..."),
    }
}
