//! 存储适配层
//!
//! 锁管理器只依赖这里定义的最小能力接口：原子的“不存在才设置”（可带过期时间）、
//! 读取、删除、TTL 查询，以及基于 watch 的乐观事务。
//!
//! - `RedisStore`: 生产环境实现，基于 redis crate
//! - `InMemoryStore`: 进程内实现，用于测试和单进程场景

mod memory;
mod redis_store;

pub use self::memory::InMemoryStore;
pub use self::redis_store::RedisStore;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// key 的剩余存活时间
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTtl {
    /// key 不存在
    Missing,
    /// key 存在但没有过期时间
    Persistent,
    /// key 将在给定时长后过期
    Expires(Duration),
}

/// 事务中缓冲的单条命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Delete(String),
}

/// 乐观事务：一组在提交时原子执行的命令
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    ops: Vec<TxnOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// 缓冲一条删除命令
    pub fn delete(mut self, key: impl Into<String>) -> Self {
        self.ops.push(TxnOp::Delete(key.into()));
        self
    }

    pub fn ops(&self) -> &[TxnOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// 事务提交结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOutcome {
    /// 已提交，按命令顺序给出每条命令的结果（删除命令为删除的 key 数）
    Committed(Vec<u64>),
    /// 被 watch 的 key 在 watch 之后发生了变化，事务未执行
    Aborted,
}

/// 共享键值存储的能力接口
///
/// 所有“不存在才设置”操作对并发调用方必须是原子的，这是互斥性的唯一来源。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// 仅当 key 不存在时设置，返回是否设置成功
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool>;

    /// 仅当 key 不存在时设置，并在同一原子操作中附加过期时间
    async fn set_if_absent_with_expiry(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// 删除 key，返回删除的数量
    async fn delete(&self, key: &str) -> Result<u64>;

    async fn ttl(&self, key: &str) -> Result<KeyTtl>;

    /// 开始 watch 一个 key，返回绑定该 watch 的会话
    async fn watch(&self, key: &str) -> Result<Box<dyn WatchSession>>;
}

/// 乐观事务会话
///
/// 会话持有 watch 所绑定的连接；`commit` 或 `unwatch` 之后会话即失效。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WatchSession: Send {
    /// 在会话内读取
    async fn get(&mut self, key: &str) -> Result<Option<String>>;

    /// 提交事务；若被 watch 的 key 已被修改、删除或过期则返回 `Aborted`
    async fn commit(&mut self, txn: Transaction) -> Result<TxnOutcome>;

    /// 放弃 watch
    async fn unwatch(&mut self) -> Result<()>;
}

/// 将时长转换为存储使用的毫秒数，不足 1 毫秒的向上取整为 1 毫秒
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    millis.max(1)
}
