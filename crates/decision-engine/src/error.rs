//! 决策引擎错误类型
//!
//! 按错误来源划分：事实计算、事实存储、操作符、条件、规则、结果分发、规则源，
//! 最外层由 [`EngineError`] 携带规则名与阶段信息。

use serde_json::Value;
use thiserror::Error;

/// 动态事实计算失败
#[derive(Debug, Error)]
pub enum FactError {
    #[error("事实计算失败: {fact} - {message}")]
    Computation { fact: String, message: String },
}

impl FactError {
    pub fn computation(fact: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Computation {
            fact: fact.into(),
            message: message.into(),
        }
    }
}

/// 事实存储（Almanac）错误
#[derive(Debug, Error)]
pub enum AlmanacError {
    #[error("未定义的事实: {0}")]
    UndefinedFact(String),

    #[error("路径无法解析: 事实 {fact} 路径 {path}")]
    PathNotFound { fact: String, path: String },

    #[error("无效的路径表达式 '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error(transparent)]
    Fact(#[from] FactError),
}

/// 操作符错误
#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("操作符未找到: {operator} (事实值 {fact_value}, 比较值 {compare_value})")]
    NotFound {
        operator: String,
        fact_value: Value,
        compare_value: Value,
    },

    #[error("类型不匹配: 操作符 {operator} 期望 {expected}, 实际 {actual}")]
    TypeMismatch {
        operator: String,
        expected: String,
        actual: String,
    },

    #[error("操作符 {operator} 不接受空值操作数")]
    NilOperand { operator: String },

    #[error("无效的正则表达式 '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl OperatorError {
    pub fn type_mismatch(operator: &str, expected: &str, actual: &Value) -> Self {
        Self::TypeMismatch {
            operator: operator.to_string(),
            expected: expected.to_string(),
            actual: type_name(actual).to_string(),
        }
    }
}

/// 条件 / 条件树评估错误
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("条件 {fact} {operator} 评估失败: {source}")]
    Fact {
        fact: String,
        operator: String,
        #[source]
        source: AlmanacError,
    },

    #[error(transparent)]
    Operator(#[from] OperatorError),
}

/// 规则结构错误（注册 / 编译阶段）
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("规则格式错误: {0}")]
    Malformed(String),

    #[error("无效的条件节点: {0}")]
    InvalidNode(String),

    #[error("规则序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 结果（事件）分发错误
#[derive(Debug, Error)]
pub enum OutcomeError {
    #[error("结果 {outcome} 执行失败: {message}")]
    Action { outcome: String, message: String },

    #[error("全局结果处理器执行失败: {outcome} - {message}")]
    Handler { outcome: String, message: String },
}

impl OutcomeError {
    pub fn action(outcome: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Action {
            outcome: outcome.into(),
            message: message.into(),
        }
    }
}

/// 规则源拉取错误
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("规则拉取失败: {0}")]
    Fetch(String),

    #[error("规则文档读取失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("规则文档解析失败: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("规则安装失败: {0}")]
    Install(#[source] Box<EngineError>),

    #[error("规则拉取已取消")]
    Cancelled,
}

/// 引擎运行错误
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("规则 {rule} 注册失败: {source}")]
    Compile {
        rule: String,
        #[source]
        source: RuleError,
    },

    #[error("规则 {rule} 评估失败: {source}")]
    Evaluation {
        rule: String,
        #[source]
        source: ConditionError,
    },

    #[error("规则 {rule} 结果分发失败: {source}")]
    Outcome {
        rule: String,
        #[source]
        source: OutcomeError,
    },

    #[error("规则 {rule} 并行评估任务异常: {message}")]
    Worker { rule: String, message: String },
}

impl EngineError {
    /// 失败所属的阶段
    pub fn phase(&self) -> &'static str {
        match self {
            Self::Compile { .. } => "compile",
            Self::Evaluation { .. } => "evaluate",
            Self::Outcome { .. } => "dispatch",
            Self::Worker { .. } => "evaluate",
        }
    }

    /// 失败的规则名
    pub fn rule(&self) -> &str {
        match self {
            Self::Compile { rule, .. }
            | Self::Evaluation { rule, .. }
            | Self::Outcome { rule, .. }
            | Self::Worker { rule, .. } => rule,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// 获取值的类型名称
pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
