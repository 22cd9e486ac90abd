use std::sync::Arc;

use application::{InMemoryMessageLog, InMemoryParticipantRegistry, MessageLog, ParticipantRegistry};
use config::{StorageBackend, StorageConfig};
use thiserror::Error;

use crate::{
    migrations::MIGRATOR,
    repository::{create_pg_pool, PgMessageLog, PgParticipantRegistry},
};

#[derive(Debug, Error)]
pub enum InfrastructureError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("storage.database_url is required for the postgres backend")]
    MissingDatabaseUrl,
}

/// 注册表和消息日志的一组实现
#[derive(Clone)]
pub struct Storage {
    pub registry: Arc<dyn ParticipantRegistry>,
    pub message_log: Arc<dyn MessageLog>,
}

impl Storage {
    pub fn in_memory() -> Self {
        Self {
            registry: Arc::new(InMemoryParticipantRegistry::new()),
            message_log: Arc::new(InMemoryMessageLog::new()),
        }
    }

    /// 按配置选择后端；PostgreSQL 会先执行迁移
    pub async fn connect(config: &StorageConfig) -> Result<Self, InfrastructureError> {
        match config.backend {
            StorageBackend::Memory => {
                tracing::info!("using in-memory storage");
                Ok(Self::in_memory())
            }
            StorageBackend::Postgres => {
                let url = config
                    .database_url
                    .as_deref()
                    .ok_or(InfrastructureError::MissingDatabaseUrl)?;
                let pool =
                    create_pg_pool(url, config.max_connections, config.acquire_timeout()).await?;
                MIGRATOR.run(&pool).await?;
                tracing::info!(max_connections = config.max_connections, "using postgres storage");

                Ok(Self {
                    registry: Arc::new(PgParticipantRegistry::new(pool.clone())),
                    message_log: Arc::new(PgMessageLog::new(pool)),
                })
            }
        }
    }
}
