use std::fmt;
use uuid::Uuid;

/// 锁的所有权令牌
///
/// 每次获取尝试都会生成新的令牌，格式为 `instance_id:uuid`：
/// 前半部分标识持有锁的进程实例，后半部分是随机的 128 位标识，保证全局唯一。
/// 释放锁时只有持有匹配令牌的调用方才能删除锁记录。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub(crate) fn generate(instance_id: &str) -> Self {
        Self(format!("{}:{}", instance_id, Uuid::new_v4()))
    }

    /// 从已有的字符串还原令牌（例如跨进程传递后）
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl AsRef<str> for LockToken {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
