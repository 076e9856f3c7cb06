//! 分布式锁模块
//!
//! 基于共享键值存储的建议性互斥锁。
//!
//! ## 设计理念
//!
//! - **原子获取**: 依赖存储的“不存在才设置”原子操作保证互斥
//! - **令牌所有权**: 每次获取生成唯一令牌，释放时只删除值仍等于该令牌的记录
//! - **过期兜底**: 带过期的锁由存储自动回收，避免持有者崩溃导致永久死锁
//!
//! ## 使用示例
//!
//! ```ignore
//! let manager = LockManager::with_defaults(Arc::new(store));
//!
//! // 最多等待 2 秒，锁 5 秒后自动过期
//! if let Some(token) = manager
//!     .acquire_lock_with_timeout("job", Duration::from_secs(2), Duration::from_secs(5))
//!     .await?
//! {
//!     do_critical_work().await?;
//!     manager.release_lock("job", &token).await?;
//! }
//! ```

mod lock_manager;
mod token;

pub use lock_manager::{LockConfig, LockManager};
pub use token::LockToken;
