//! 分布式锁演示程序
//!
//! 连接配置中的 Redis，演示两个实例争用同一把锁的完整流程：
//! 获取、争用超时、释放、再次获取。

use anyhow::{Context, Result};
use dlock::{LockConfig, LockManager, RedisStore};
use dlock_shared::{config::AppConfig, observability};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

const LOCK_NAME: &str = "job";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载配置：从 config/{service_name}.toml 加载，包含可观测性配置
    let config = AppConfig::load("dlock-service").unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });

    // 2. 初始化可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(environment = %config.environment, "Configuration loaded");

    // 3. 初始化 Redis 存储并验证连接
    let store = Arc::new(RedisStore::new(&config.redis)?);
    store
        .health_check()
        .await
        .context("Redis health check failed")?;
    info!("Redis connection established");

    // 两个锁管理器模拟两个独立进程，共享同一个存储
    let lock_config = LockConfig::from(&config.lock);
    let actor_a = LockManager::new(Arc::clone(&store), lock_config.clone());
    let actor_b = LockManager::new(Arc::clone(&store), lock_config);

    let lock_ttl = Duration::from_secs(5);

    let t1 = actor_a
        .acquire_lock_with_timeout(LOCK_NAME, Duration::from_secs(2), lock_ttl)
        .await?
        .context("actor A could not acquire the lock")?;
    info!(token = %t1, "Actor A acquired lock");

    let started = Instant::now();
    let contended = actor_b
        .acquire_lock_with_timeout(LOCK_NAME, Duration::from_millis(100), lock_ttl)
        .await?;
    info!(
        acquired = contended.is_some(),
        waited_ms = started.elapsed().as_millis() as u64,
        "Actor B attempted lock while A holds it"
    );

    let released = actor_a.release_lock(LOCK_NAME, &t1).await?;
    info!(released, "Actor A released lock");

    let t2 = actor_b
        .acquire_lock_with_timeout(LOCK_NAME, Duration::from_millis(100), lock_ttl)
        .await?
        .context("actor B could not acquire the lock after release")?;
    let ttl = actor_b.lock_ttl(LOCK_NAME).await?;
    info!(token = %t2, ttl = ?ttl, "Actor B acquired lock");

    actor_b.release_lock(LOCK_NAME, &t2).await?;
    info!("Demo finished");

    Ok(())
}
