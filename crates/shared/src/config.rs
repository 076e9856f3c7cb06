//! 配置管理模块
//!
//! 支持多格式配置文件加载，环境变量覆盖，以及类型安全的配置访问。

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
        }
    }
}

/// 分布式锁配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// 未指定等待时间时，获取锁的默认最长等待（毫秒）
    pub default_acquire_timeout_ms: u64,
    /// 两次获取尝试之间的轮询间隔（毫秒）
    ///
    /// 间隔越小获取延迟越低，但对存储的压力越大。
    pub poll_interval_ms: u64,
    /// 锁记录 key 的前缀
    pub key_prefix: String,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            default_acquire_timeout_ms: 10_000,
            poll_interval_ms: 1,
            key_prefix: "lock:".to_string(),
        }
    }
}

/// 可观测性配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// 服务名称，用于标识日志和指标的来源
    pub service_name: String,
    pub log_level: String,
    /// 是否输出 JSON 格式日志（否则为人类可读格式）
    pub json_logs: bool,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown-service".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}

impl ObservabilityConfig {
    /// 注入服务名
    pub fn with_service_name(mut self, service_name: &str) -> Self {
        self.service_name = service_name.to_string();
        self
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub service_name: String,
    pub environment: String,
    pub redis: RedisConfig,
    pub lock: LockSettings,
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序（后加载的会覆盖先加载的同名配置项）：
    /// 1. config/default.toml（默认配置）
    /// 2. config/{environment}.toml（环境特定配置）
    /// 3. config/{service_name}.toml（服务特定配置）
    /// 4. 环境变量（DLOCK_ 前缀，双下划线分隔层级，如 DLOCK_REDIS__URL -> redis.url）
    pub fn load(service_name: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("DLOCK_ENV").unwrap_or_else(|_| "development".to_string());
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".to_string());

        Self::load_from(&config_dir, service_name, &env)
    }

    /// 从指定目录加载配置
    pub fn load_from(
        config_dir: impl AsRef<Path>,
        service_name: &str,
        env: &str,
    ) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("service_name", service_name)?
            .set_default("environment", env)?
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", env))).required(false))
            .add_source(
                File::from(config_dir.join(format!("{}.toml", service_name))).required(false),
            )
            .add_source(
                Environment::with_prefix("DLOCK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
