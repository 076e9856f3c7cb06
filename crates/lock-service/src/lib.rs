//! 基于共享键值存储的分布式锁服务
//!
//! 多个独立进程通过共享存储就“谁持有某个命名资源”达成一致：
//! 有界等待的获取、只有持有者才能执行的安全释放，以及防止持有者崩溃导致死锁的自动过期。
//!
//! ## 模块结构
//!
//! - `store`: 存储适配层（能力接口、Redis 实现、进程内实现）
//! - `lock`: 锁管理器与所有权令牌
//! - `error`: 错误类型定义

pub mod error;
pub mod lock;
pub mod store;

pub use error::{LockError, Result};
pub use lock::{LockConfig, LockManager, LockToken};
pub use store::{
    InMemoryStore, KeyTtl, RedisStore, StoreAdapter, Transaction, TxnOp, TxnOutcome, WatchSession,
};
