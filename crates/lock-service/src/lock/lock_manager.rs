//! 分布式锁管理器
//!
//! 基于共享键值存储实现的建议性互斥锁：
//! - 获取：原子的“不存在才设置”，失败后按固定间隔轮询直到截止时间
//! - 带过期的获取：设置值与过期时间在同一原子操作中完成
//! - 释放：watch + 读取比较 + 事务删除，只有持有匹配令牌的调用方才能释放

use dlock_shared::config::LockSettings;
use dlock_shared::observability::metrics::{
    record_lock_acquire, record_lock_release, record_release_conflict,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::LockToken;
use crate::error::{LockError, Result};
use crate::store::{KeyTtl, StoreAdapter, Transaction, TxnOutcome};

/// 锁配置
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// `acquire_lock` 的默认最长等待时间
    pub default_acquire_timeout: Duration,
    /// 两次获取尝试之间的轮询间隔
    pub poll_interval: Duration,
    /// 锁记录 key 的前缀
    pub key_prefix: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_acquire_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(1),
            key_prefix: "lock:".to_string(),
        }
    }
}

impl From<&LockSettings> for LockConfig {
    fn from(settings: &LockSettings) -> Self {
        Self {
            default_acquire_timeout: Duration::from_millis(settings.default_acquire_timeout_ms),
            poll_interval: Duration::from_millis(settings.poll_interval_ms),
            key_prefix: settings.key_prefix.clone(),
        }
    }
}

/// 分布式锁管理器
///
/// 存储句柄在构造时显式注入，测试中可以替换为 `InMemoryStore` 或 mock。
/// 锁是建议性的：所有参与方都必须通过锁管理器访问受保护的资源。
pub struct LockManager<S: StoreAdapter + ?Sized> {
    store: Arc<S>,
    config: LockConfig,
    /// 实例唯一标识，作为令牌前缀用于区分不同进程持有的锁
    instance_id: String,
}

impl<S: StoreAdapter + ?Sized> Clone for LockManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            instance_id: self.instance_id.clone(),
        }
    }
}

impl<S: StoreAdapter + ?Sized> LockManager<S> {
    /// 创建锁管理器
    pub fn new(store: Arc<S>, config: LockConfig) -> Self {
        Self {
            store,
            config,
            instance_id: Uuid::new_v4().to_string(),
        }
    }

    /// 使用默认配置创建锁管理器
    pub fn with_defaults(store: Arc<S>) -> Self {
        Self::new(store, LockConfig::default())
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// 锁名对应的存储 key
    pub fn lock_key(&self, name: &str) -> String {
        format!("{}{}", self.config.key_prefix, name)
    }

    /// 获取锁，使用默认等待时间，不设置过期
    ///
    /// 持有者崩溃时锁永远不会被释放；临界区时长有界时应使用
    /// [`acquire_lock_with_timeout`](Self::acquire_lock_with_timeout)。
    pub async fn acquire_lock(&self, name: &str) -> Result<Option<LockToken>> {
        self.acquire_lock_with_wait(name, self.config.default_acquire_timeout)
            .await
    }

    /// 获取锁，最多等待 `acquire_timeout`，不设置过期
    ///
    /// 返回 `Ok(None)` 表示在截止时间前未能获取；锁竞争与超时都不是错误。
    /// `Duration::MAX` 表示一直等待，直到获取成功或存储出错。
    pub async fn acquire_lock_with_wait(
        &self,
        name: &str,
        acquire_timeout: Duration,
    ) -> Result<Option<LockToken>> {
        self.acquire(name, acquire_timeout, None).await
    }

    /// 获取带过期时间的锁，最多等待 `acquire_timeout`
    ///
    /// 锁记录在 `lock_ttl` 之后由存储自动删除，调用方必须保证临界区在此之前完成。
    pub async fn acquire_lock_with_timeout(
        &self,
        name: &str,
        acquire_timeout: Duration,
        lock_ttl: Duration,
    ) -> Result<Option<LockToken>> {
        self.acquire(name, acquire_timeout, Some(lock_ttl)).await
    }

    /// 尝试获取锁，不重试
    ///
    /// 如果锁不可用立即返回 None，不会阻塞等待。
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn try_acquire_lock(
        &self,
        name: &str,
        lock_ttl: Option<Duration>,
    ) -> Result<Option<LockToken>> {
        validate_name(name)?;
        let key = self.lock_key(name);
        let token = LockToken::generate(&self.instance_id);

        if self.try_set(&key, &token, lock_ttl).await? {
            debug!(key = %key, token = %token, "Lock acquired");
            Ok(Some(token))
        } else {
            debug!(key = %key, "Lock not acquired, resource is locked");
            Ok(None)
        }
    }

    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    async fn acquire(
        &self,
        name: &str,
        acquire_timeout: Duration,
        lock_ttl: Option<Duration>,
    ) -> Result<Option<LockToken>> {
        validate_name(name)?;
        let key = self.lock_key(name);
        let token = LockToken::generate(&self.instance_id);

        let started = Instant::now();
        // 超出时钟范围的等待时长视为无限等待
        let deadline = started.checked_add(acquire_timeout);
        let mut attempts: u32 = 0;

        // 至少尝试一次；失败后按轮询间隔重试，直到截止时间
        loop {
            attempts += 1;
            let acquired = match self.try_set(&key, &token, lock_ttl).await {
                Ok(acquired) => acquired,
                Err(e) => {
                    record_lock_acquire("error", started.elapsed().as_secs_f64());
                    return Err(e);
                }
            };

            if acquired {
                debug!(key = %key, token = %token, attempts, "Lock acquired");
                record_lock_acquire("acquired", started.elapsed().as_secs_f64());
                return Ok(Some(token));
            }

            let now = Instant::now();
            let remaining = deadline.map(|deadline| deadline.saturating_duration_since(now));
            if remaining.is_some_and(|remaining| remaining.is_zero()) {
                debug!(
                    key = %key,
                    attempts,
                    timeout_ms = acquire_timeout.as_millis() as u64,
                    "Lock not acquired before deadline"
                );
                record_lock_acquire("timeout", started.elapsed().as_secs_f64());
                return Ok(None);
            }

            let delay = remaining.map_or(self.config.poll_interval, |remaining| {
                self.config.poll_interval.min(remaining)
            });
            tokio::time::sleep(delay).await;
        }
    }

    async fn try_set(&self, key: &str, token: &LockToken, ttl: Option<Duration>) -> Result<bool> {
        match ttl {
            Some(ttl) => {
                self.store
                    .set_if_absent_with_expiry(key, token.as_str(), ttl)
                    .await
            }
            None => self.store.set_if_absent(key, token.as_str()).await,
        }
    }

    /// 释放锁
    ///
    /// 只有当锁记录的当前值等于 `token` 时才删除。返回 `Ok(false)` 表示调用方
    /// 已不再持有该锁（已过期、被他人重新获取，或从未持有），不应盲目重试。
    /// 事务因并发修改被中止时，从 watch 开始整体重试，直到成功或确认值不匹配。
    #[instrument(skip(self, token), fields(instance_id = %self.instance_id))]
    pub async fn release_lock(&self, name: &str, token: &LockToken) -> Result<bool> {
        validate_name(name)?;
        let key = self.lock_key(name);

        loop {
            let mut session = self.store.watch(&key).await.inspect_err(|_| {
                record_lock_release("error");
            })?;

            let current = session.get(&key).await.inspect_err(|_| {
                record_lock_release("error");
            })?;

            if current.as_deref() != Some(token.as_str()) {
                session.unwatch().await.inspect_err(|_| {
                    record_lock_release("error");
                })?;
                warn!(
                    key = %key,
                    token = %token,
                    "Lock was already released or owned by another client"
                );
                record_lock_release("not_owner");
                return Ok(false);
            }

            let outcome = session
                .commit(Transaction::new().delete(key.as_str()))
                .await
                .inspect_err(|_| {
                    record_lock_release("error");
                })?;

            match outcome {
                TxnOutcome::Committed(_) => {
                    info!(key = %key, "Lock released");
                    record_lock_release("released");
                    return Ok(true);
                }
                TxnOutcome::Aborted => {
                    debug!(key = %key, "Lock key changed during release, retrying");
                    record_release_conflict();
                }
            }
        }
    }

    /// 当前持有锁的令牌（用于诊断）
    pub async fn current_holder(&self, name: &str) -> Result<Option<String>> {
        validate_name(name)?;
        self.store.get(&self.lock_key(name)).await
    }

    /// 锁记录的剩余存活时间
    pub async fn lock_ttl(&self, name: &str) -> Result<KeyTtl> {
        validate_name(name)?;
        self.store.ttl(&self.lock_key(name)).await
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(LockError::invalid_argument("name", "锁名不能为空"));
    }
    Ok(())
}
