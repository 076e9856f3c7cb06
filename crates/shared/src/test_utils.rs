//! 测试工具模块
//!
//! 提供集成测试所需的辅助函数，用于简化测试代码编写，提高测试的可重复性。

use uuid::Uuid;

use crate::config::{LockSettings, RedisConfig};

/// 创建测试用 Redis 配置
///
/// 优先使用 TEST_REDIS_URL，其次 REDIS_URL，否则连接本地 1 号库，避免污染默认库
pub fn test_redis_config() -> RedisConfig {
    let url = std::env::var("TEST_REDIS_URL")
        .or_else(|_| std::env::var("REDIS_URL"))
        .unwrap_or_else(|_| "redis://localhost:6379/1".to_string());
    RedisConfig { url }
}

/// 创建测试用锁配置
///
/// 默认等待时间缩短为 1 秒，避免失败的测试长时间挂起
pub fn test_lock_settings() -> LockSettings {
    LockSettings {
        default_acquire_timeout_ms: 1_000,
        ..LockSettings::default()
    }
}

/// 生成唯一的测试锁名，保证并行测试互不干扰
pub fn unique_lock_name(prefix: &str) -> String {
    format!("test:{}:{}", prefix, Uuid::new_v4())
}
