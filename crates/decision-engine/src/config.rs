//! 引擎配置
//!
//! 通过 `decision_shared::config::load` 按分层规则加载：
//! 默认文件 → 环境文件 → 服务文件 → `DECISION__` 前缀环境变量。

use crate::almanac::AlmanacOptions;
use decision_shared::observability::ObservabilityConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// 规则排序方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// 优先级高的先执行
    #[default]
    PriorityDesc,
    PriorityAsc,
    /// 保持添加顺序
    Insertion,
}

/// 规则评估方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

/// 引擎配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sort: SortOrder,
    pub execution: ExecutionMode,
    /// 并行模式下的工作者数量，0 视为 1
    pub workers: usize,
    /// 跳过引用了缺失事实的规则
    pub smart_skip: bool,
    /// 在结果中保留完整评估树
    pub audit: bool,
    pub cache_conditions: bool,
    pub allow_undefined_facts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sort: SortOrder::default(),
            execution: ExecutionMode::default(),
            workers: 1,
            smart_skip: false,
            audit: false,
            cache_conditions: false,
            allow_undefined_facts: true,
        }
    }
}

impl EngineConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.max(1)
    }

    pub fn is_parallel(&self) -> bool {
        self.execution == ExecutionMode::Parallel
    }

    /// 新建 Almanac 时使用的选项
    pub fn almanac_options(&self) -> AlmanacOptions {
        AlmanacOptions {
            allow_undefined_facts: self.allow_undefined_facts,
            cache_conditions: self.cache_conditions,
        }
    }
}

/// 规则重载配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    pub interval_ms: u64,
    /// 规则文件路径，为空时不启用文件重载
    pub rules_path: Option<PathBuf>,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            rules_path: None,
        }
    }
}

impl ReloadConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// 服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub service_name: String,
    pub environment: String,
    pub engine: EngineConfig,
    pub reload: ReloadConfig,
    pub observability: ObservabilityConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: "decision-engine".to_string(),
            environment: "development".to_string(),
            engine: EngineConfig::default(),
            reload: ReloadConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// 从配置文件和环境变量加载
    pub fn load(service_name: &str) -> Result<Self, decision_shared::config::ConfigError> {
        decision_shared::config::load(service_name)
    }
}
