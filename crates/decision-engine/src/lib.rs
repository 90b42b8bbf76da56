//! 业务决策规则引擎
//!
//! 提供可复用的规则评估能力，支持：
//! - JSON 规则定义和解析
//! - 规则编译（预计算缓存键和依赖事实）
//! - 短路求值与条件结果缓存
//! - 顺序或并行评估，分发顺序保持一致
//! - 同步 / 异步结果分发
//! - 规则源热重载

pub mod almanac;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod fact;
pub mod metrics;
pub mod models;
pub mod operators;
pub mod outcome;
pub mod path;
pub mod report;
pub mod source;
pub mod store;

pub use almanac::{Almanac, AlmanacOptions};
pub use compiler::{CompiledRule, CompiledTree, RuleCompiler};
pub use config::{EngineConfig, ExecutionMode, ReloadConfig, ServiceConfig, SortOrder};
pub use engine::Engine;
pub use error::{
    AlmanacError, ConditionError, EngineError, FactError, OperatorError, OutcomeError, Result,
    RuleError, SourceError,
};
pub use executor::TreeExecutor;
pub use fact::{Fact, FactParams};
pub use metrics::{MetricsSink, RecorderSink};
pub use models::{
    Condition, ConditionNode, ConditionResult, ConditionTree, NodeResult, OutcomeRef, Rule,
    TreeResult,
};
pub use operators::{Operator, OperatorRegistry};
pub use outcome::{FnAction, Outcome, OutcomeAction, OutcomeEvent, OutcomeMode, OutcomeRegistry};
pub use report::{Decision, DecisionResponse, RuleResult, RunReport};
pub use source::{JsonFileSource, ReloadStatus, RuleReloader, RuleSource};
pub use store::RuleStore;
