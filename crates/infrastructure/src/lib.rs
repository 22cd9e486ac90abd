//! 基础设施层实现。
//!
//! 提供 PostgreSQL 版本的参与者注册表和消息日志，以及按配置组装存储后端的构建器。

pub mod builder;
pub mod migrations;
pub mod repository;

pub use builder::{InfrastructureError, Storage};
pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgMessageLog, PgParticipantRegistry};
