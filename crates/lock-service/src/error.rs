//! 分布式锁错误类型
//!
//! 锁竞争与等待超时都不是错误（以 `Ok(None)` / `Ok(false)` 表示），
//! 这里只包含存储层故障与调用方参数错误。

use thiserror::Error;

/// 分布式锁错误类型
#[derive(Debug, Error)]
pub enum LockError {
    // === 存储层错误 ===
    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    // === 调用方错误 ===
    #[error("无效的参数: {field} - {message}")]
    InvalidArgument { field: String, message: String },
}

/// 分布式锁 Result 类型别名
pub type Result<T> = std::result::Result<T, LockError>;

impl LockError {
    /// 构造参数错误
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// 是否为可重试的基础设施错误
    ///
    /// 锁层本身不对基础设施故障做重试，由调用方决定重试策略。
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Redis(_))
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Redis(_) => "REDIS_ERROR",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
        }
    }
}
