//! 进程内存储实现
//!
//! 语义与 Redis 一致：原子的 NX 设置、惰性过期、watch 在 key 被删除、重建或过期后
//! 使事务中止。已删除的 key 不保留任何记录。时间取自 tokio 时钟，测试中可使用暂停时间精确控制过期。

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::{KeyTtl, StoreAdapter, Transaction, TxnOp, TxnOutcome, WatchSession};
use crate::error::Result;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
    /// 写入时分配的修订号，全局递增，同一个 key 重建后必然不同
    revision: u64,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Debug, Default)]
struct State {
    entries: HashMap<String, Entry>,
    next_revision: u64,
}

impl State {
    /// 当前存活记录的修订号，key 不存在时为 `None`
    fn revision(&self, key: &str) -> Option<u64> {
        self.entries.get(key).map(|e| e.revision)
    }

    /// 清理已过期的 key
    fn purge_expired(&mut self, key: &str, now: Instant) {
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
        }
    }

    fn live(&mut self, key: &str) -> Option<&Entry> {
        self.purge_expired(key, Instant::now());
        self.entries.get(key)
    }

    fn insert_if_absent(&mut self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let now = Instant::now();
        self.purge_expired(key, now);
        if self.entries.contains_key(key) {
            return false;
        }
        self.next_revision += 1;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: ttl.and_then(|ttl| now.checked_add(ttl)),
                revision: self.next_revision,
            },
        );
        true
    }

    fn remove(&mut self, key: &str) -> u64 {
        self.purge_expired(key, Instant::now());
        if self.entries.remove(key).is_some() { 1 } else { 0 }
    }
}

/// 进程内键值存储
///
/// 克隆得到的句柄共享同一份数据，可以像连接一样分发给多个任务。
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 未过期的 key 数量
    pub fn len(&self) -> usize {
        let now = Instant::now();
        let state = self.state.lock();
        state.entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StoreAdapter for InMemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        Ok(self.state.lock().insert_if_absent(key, value, None))
    }

    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let ttl = Duration::from_millis(super::ttl_millis(ttl));
        Ok(self.state.lock().insert_if_absent(key, value, Some(ttl)))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().live(key).map(|e| e.value.clone()))
    }

    async fn delete(&self, key: &str) -> Result<u64> {
        Ok(self.state.lock().remove(key))
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let now = Instant::now();
        let mut state = self.state.lock();
        state.purge_expired(key, now);
        Ok(match state.entries.get(key) {
            None => KeyTtl::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => KeyTtl::Persistent,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => KeyTtl::Expires(at.saturating_duration_since(now)),
        })
    }

    async fn watch(&self, key: &str) -> Result<Box<dyn WatchSession>> {
        let mut state = self.state.lock();
        state.purge_expired(key, Instant::now());
        let revision = state.revision(key);
        Ok(Box::new(InMemoryWatch {
            state: Arc::clone(&self.state),
            watched: vec![(key.to_string(), revision)],
        }))
    }
}

/// 进程内 watch 会话：记录 watch 时刻各 key 的修订号
///
/// 只比较提交时刻与 watch 时刻的记录是否为同一次写入。watch 时不存在、
/// 期间被创建又删除的 key 不会使事务中止，这一点比 Redis 宽松。
struct InMemoryWatch {
    state: Arc<Mutex<State>>,
    watched: Vec<(String, Option<u64>)>,
}

#[async_trait]
impl WatchSession for InMemoryWatch {
    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().live(key).map(|e| e.value.clone()))
    }

    async fn commit(&mut self, txn: Transaction) -> Result<TxnOutcome> {
        let watched = std::mem::take(&mut self.watched);
        let now = Instant::now();
        let mut state = self.state.lock();

        for (key, revision) in &watched {
            state.purge_expired(key, now);
            if state.revision(key) != *revision {
                return Ok(TxnOutcome::Aborted);
            }
        }

        let results = txn
            .ops()
            .iter()
            .map(|op| match op {
                TxnOp::Delete(key) => state.remove(key),
            })
            .collect();
        Ok(TxnOutcome::Committed(results))
    }

    async fn unwatch(&mut self) -> Result<()> {
        self.watched.clear();
        Ok(())
    }
}
