//! 共享库
//!
//! 包含所有进程共用的配置、可观测性与测试辅助代码。

pub mod config;
pub mod observability;
pub mod test_utils;
