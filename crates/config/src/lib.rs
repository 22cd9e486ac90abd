//! 统一配置中心
//!
//! 提供中继服务的配置管理，包括：
//! - HTTP 服务监听与 CORS
//! - 存储后端（内存或 PostgreSQL）
//! - 在线状态清扫参数
//!
//! 加载顺序：默认值 -> 可选配置文件（`CHAT_RELAY_CONFIG`）-> 环境变量（`CHAT_RELAY_*`，
//! 嵌套字段用 `__` 分隔）。

use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 指定配置文件路径的环境变量
pub const CONFIG_FILE_ENV: &str = "CHAT_RELAY_CONFIG";
/// 环境变量前缀
pub const ENV_PREFIX: &str = "CHAT_RELAY_";

/// 全局应用配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,
    #[validate(nested)]
    pub storage: StorageConfig,
    #[validate(nested)]
    pub presence: PresenceConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,
    #[validate(range(min = 1))]
    pub port: u16,
    /// 为空时允许任意来源
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

/// 存储配置
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub database_url: Option<String>,
    #[validate(range(min = 1))]
    pub max_connections: u32,
    #[validate(range(min = 1))]
    pub acquire_timeout_seconds: u64,
}

/// 在线状态配置（毫秒）
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PresenceConfig {
    #[validate(range(min = 1))]
    pub sweep_interval_ms: u64,
    #[validate(range(min = 1))]
    pub expiry_threshold_ms: u64,
    #[validate(range(min = 1))]
    pub eviction_timeout_ms: u64,
}

impl PresenceConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn expiry_threshold(&self) -> Duration {
        Duration::from_millis(self.expiry_threshold_ms)
    }

    pub fn eviction_timeout(&self) -> Duration {
        Duration::from_millis(self.eviction_timeout_ms)
    }
}

impl StorageConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".into(),
                port: 5000,
                cors_origins: Vec::new(),
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                database_url: None,
                max_connections: 5,
                acquire_timeout_seconds: 5,
            },
            presence: PresenceConfig {
                sweep_interval_ms: 15_000,
                expiry_threshold_ms: 10_000,
                eviction_timeout_ms: 5_000,
            },
        }
    }
}

impl AppConfig {
    /// 按默认值 -> 文件 -> 环境变量的顺序加载并验证
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment())
    }

    pub fn figment() -> Figment {
        let mut fig = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract().map_err(Box::new)?;
        config.check()?;
        Ok(config)
    }

    /// 字段级验证加上跨字段检查
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()?;

        if self.storage.backend == StorageBackend::Postgres
            && self
                .storage
                .database_url
                .as_deref()
                .map_or(true, |url| url.trim().is_empty())
        {
            return Err(ConfigError::MissingDatabaseUrl);
        }

        Ok(())
    }

    /// 适合写入日志的表示，隐藏数据库凭据
    pub fn sanitize(&self) -> String {
        let mut sanitized = self.clone();
        sanitized.storage.database_url = sanitized.storage.database_url.map(|url| redact_url(&url));
        format!("{:?}", sanitized)
    }
}

fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://[REDACTED]{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Extract(#[from] Box<figment::Error>),
    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),
    #[error("storage.database_url is required for the postgres backend")]
    MissingDatabaseUrl,
}
