//! 共享库
//!
//! 包含决策引擎及其宿主服务共用的分层配置加载和可观测性初始化代码。

pub mod config;
pub mod observability;
