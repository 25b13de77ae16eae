//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - JWT认证
//! - 消息存储
//! - 心跳检测
//! - 附件目录

use std::time::Duration;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// 全局应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务配置
    #[serde(default)]
    pub server: ServerConfig,
    /// JWT认证配置
    #[serde(default)]
    pub jwt: JwtConfig,
    /// 数据库配置
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 心跳配置
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    /// 附件存储配置
    #[serde(default)]
    pub uploads: UploadConfig,
    /// 中继配置
    #[serde(default)]
    pub relay: RelayConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 允许携带凭据跨域访问的前端地址
    #[serde(default)]
    pub client_origin: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 4040,
            client_origin: None,
        }
    }
}

/// JWT配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expiration_hours: 24,
        }
    }
}

/// 数据库配置，未配置 url 时使用内存存储
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// 心跳配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// 探测间隔
    pub interval_ms: u64,
    /// 等待 pong 的超时时间
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 5_000,
            timeout_ms: 1_000,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 附件存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub dir: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: "uploads".into(),
        }
    }
}

/// 中继配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// 每个连接的出站队列容量
    pub outbound_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 256,
        }
    }
}

impl AppConfig {
    /// 加载顺序：默认值 -> 可选配置文件 (APP_CONFIG_FILE) -> 环境变量 (APP_*)
    pub fn load() -> Result<Self, ConfigError> {
        let mut fig = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Ok(path) = std::env::var("APP_CONFIG_FILE") {
            if path.ends_with(".yml") || path.ends_with(".yaml") {
                fig = fig.merge(Yaml::file(path));
            } else if path.ends_with(".json") {
                fig = fig.merge(Json::file(path));
            } else {
                fig = fig.merge(Toml::file(path));
            }
        }
        fig = fig.merge(Env::prefixed("APP_").split("__"));

        Self::from_figment(fig)
    }

    pub fn from_figment(fig: Figment) -> Result<Self, ConfigError> {
        let cfg: AppConfig = fig.extract().map_err(Box::new)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.trim().is_empty() {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be set (APP_JWT__SECRET)".to_string(),
            ));
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "port must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat.interval_ms == 0 || self.heartbeat.timeout_ms == 0 {
            return Err(ConfigError::InvalidHeartbeat(
                "interval and timeout must be greater than 0".to_string(),
            ));
        }

        if self.heartbeat.timeout_ms >= self.heartbeat.interval_ms {
            return Err(ConfigError::InvalidHeartbeat(
                "timeout must be shorter than the ping interval".to_string(),
            ));
        }

        if self.relay.outbound_buffer == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "outbound buffer must be greater than 0".to_string(),
            ));
        }

        if self.database.url.is_some() && self.database.max_connections == 0 {
            return Err(ConfigError::InvalidDatabaseConfig(
                "Max connections must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// 用于日志输出的脱敏表示
    pub fn sanitize(&self) -> String {
        let mut redacted = self.clone();
        redacted.jwt.secret = "[REDACTED]".into();
        if redacted.database.url.is_some() {
            redacted.database.url = Some("[REDACTED]".into());
        }
        format!("{:?}", redacted)
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid heartbeat configuration: {0}")]
    InvalidHeartbeat(String),
}
