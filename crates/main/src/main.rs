//! 主应用程序入口
//!
//! 加载配置，装配存储与中继中枢，启动 Axum 服务。

use std::path::PathBuf;
use std::sync::Arc;

use application::repository::memory::MemoryMessageRepository;
use application::{
    Clock, HeartbeatSettings, MessageRepository, RelayHub, RelayHubDependencies, SystemClock,
};
use config::AppConfig;
use infrastructure::{create_pg_pool, LocalAttachmentStore, PgMessageRepository, MIGRATOR};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, ConnectionSettings, JwtService, RouterOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitize(), "configuration loaded");

    let message_repository: Arc<dyn MessageRepository> = match &config.database.url {
        Some(url) => {
            let pool = create_pg_pool(url, config.database.max_connections).await?;
            MIGRATOR.run(&pool).await?;
            tracing::info!("postgres message store ready");
            Arc::new(PgMessageRepository::new(pool))
        }
        None => {
            tracing::warn!("no database url configured, messages are kept in memory only");
            Arc::new(MemoryMessageRepository::new())
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let uploads_dir = PathBuf::from(&config.uploads.dir);
    let attachment_store = Arc::new(LocalAttachmentStore::new(&uploads_dir, clock.clone()));

    let hub = Arc::new(RelayHub::new(RelayHubDependencies {
        message_repository,
        attachment_store,
        clock,
    }));
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let state = AppState::new(
        hub.clone(),
        jwt_service,
        ConnectionSettings {
            heartbeat: HeartbeatSettings {
                interval: config.heartbeat.interval(),
                timeout: config.heartbeat.timeout(),
            },
            outbound_buffer: config.relay.outbound_buffer,
        },
    );
    let app = router(
        state,
        RouterOptions {
            uploads_dir,
            client_origin: config.server.client_origin.clone(),
        },
    );

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "relay server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await?;

    tracing::info!("relay server stopped");
    Ok(())
}

// 收到 ctrl-c 后驱逐所有长连接
async fn shutdown_signal(hub: Arc<RelayHub>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
    tracing::info!("shutdown signal received");
    hub.shutdown().await;
}
