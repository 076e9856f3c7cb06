//! Redis 存储实现
//!
//! 普通命令每次从 `Client` 获取多路复用连接；watch 会话独占一条新建连接，
//! 保证 WATCH / MULTI / EXEC 不会与其他请求交错。

use async_trait::async_trait;
use dlock_shared::config::RedisConfig;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{KeyTtl, StoreAdapter, Transaction, TxnOp, TxnOutcome, WatchSession, ttl_millis};
use crate::error::{LockError, Result};

/// 基于 Redis 的存储
#[derive(Clone)]
pub struct RedisStore {
    client: Client,
}

impl RedisStore {
    /// 创建 Redis 客户端（不会立即建立连接）
    pub fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.as_str())?;
        info!("Redis client created");
        Ok(Self { client })
    }

    /// 获取连接
    async fn get_conn(&self) -> Result<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(LockError::from)
    }

    /// 健康检查
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.get_conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(LockError::from)
    }
}

/// 解析 PTTL 的返回值：-2 表示 key 不存在，-1 表示没有过期时间
fn parse_pttl(reply: i64) -> KeyTtl {
    match reply {
        -2 => KeyTtl::Missing,
        ms if ms < 0 => KeyTtl::Persistent,
        ms => KeyTtl::Expires(Duration::from_millis(ms.unsigned_abs())),
    }
}

#[async_trait]
impl StoreAdapter for RedisStore {
    #[instrument(skip(self, value))]
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.get_conn().await?;

        // SET key value NX：只在 key 不存在时设置，成功返回 "OK"，失败返回 nil
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    #[instrument(skip(self, value))]
    async fn set_if_absent_with_expiry(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool> {
        let mut conn = self.get_conn().await?;

        // SET key value NX PX milliseconds：设置与过期时间在同一条命令中原子完成
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;

        Ok(result.is_some())
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.get_conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> Result<u64> {
        let mut conn = self.get_conn().await?;
        let count: u64 = conn.del(key).await?;
        Ok(count)
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        let mut conn = self.get_conn().await?;
        let reply: i64 = redis::cmd("PTTL").arg(key).query_async(&mut conn).await?;
        Ok(parse_pttl(reply))
    }

    #[instrument(skip(self))]
    async fn watch(&self, key: &str) -> Result<Box<dyn WatchSession>> {
        // WATCH 状态绑定在连接上，必须使用独占连接
        let mut conn = self.get_conn().await?;
        redis::cmd("WATCH")
            .arg(key)
            .query_async::<()>(&mut conn)
            .await?;
        debug!(key = %key, "Watching key");
        Ok(Box::new(RedisWatch { conn }))
    }
}

/// Redis watch 会话
struct RedisWatch {
    conn: MultiplexedConnection,
}

#[async_trait]
impl WatchSession for RedisWatch {
    async fn get(&mut self, key: &str) -> Result<Option<String>> {
        let value: Option<String> = self.conn.get(key).await?;
        Ok(value)
    }

    async fn commit(&mut self, txn: Transaction) -> Result<TxnOutcome> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in txn.ops() {
            match op {
                TxnOp::Delete(key) => {
                    pipe.del(key);
                }
            }
        }

        // MULTI ... EXEC：被 watch 的 key 发生变化时 EXEC 返回 nil
        let results: Option<Vec<u64>> = pipe.query_async(&mut self.conn).await?;
        Ok(match results {
            Some(results) => TxnOutcome::Committed(results),
            None => TxnOutcome::Aborted,
        })
    }

    async fn unwatch(&mut self) -> Result<()> {
        redis::cmd("UNWATCH")
            .query_async::<()>(&mut self.conn)
            .await?;
        Ok(())
    }
}
