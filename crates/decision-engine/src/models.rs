//! 决策引擎领域模型

use crate::error::RuleError;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// 规则定义
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    /// 数值越大越先评估
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub conditions: ConditionTree,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_success: Vec<OutcomeRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on_failure: Vec<OutcomeRef>,
}

impl Rule {
    pub fn new(name: impl Into<String>, conditions: ConditionTree) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            conditions,
            on_success: Vec::new(),
            on_failure: Vec::new(),
        }
    }

    /// 从 JSON 字符串解析
    pub fn from_json(json: &str) -> Result<Self, RuleError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn on_success(mut self, outcome: OutcomeRef) -> Self {
        self.on_success.push(outcome);
        self
    }

    pub fn on_failure(mut self, outcome: OutcomeRef) -> Self {
        self.on_failure.push(outcome);
        self
    }
}

/// 规则对结果的引用，参数覆盖结果自身的默认参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl OutcomeRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// 单个比较条件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Condition {
    pub fact: String,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl Condition {
    pub fn new(fact: impl Into<String>, operator: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            fact: fact.into(),
            operator: operator.into(),
            value: value.into(),
            path: None,
            params: Map::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

/// 条件树：all (AND) / any (OR) / none (NOR) 三个子节点组
///
/// 未设置的组视为满足，空树恒为真。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConditionTree {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<ConditionNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<ConditionNode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub none: Vec<ConditionNode>,
}

impl ConditionTree {
    pub fn all(children: Vec<ConditionNode>) -> Self {
        Self {
            all: children,
            ..Default::default()
        }
    }

    pub fn any(children: Vec<ConditionNode>) -> Self {
        Self {
            any: children,
            ..Default::default()
        }
    }

    pub fn none(children: Vec<ConditionNode>) -> Self {
        Self {
            none: children,
            ..Default::default()
        }
    }

    pub fn with_any(mut self, children: Vec<ConditionNode>) -> Self {
        self.any = children;
        self
    }

    pub fn with_none(mut self, children: Vec<ConditionNode>) -> Self {
        self.none = children;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty() && self.any.is_empty() && self.none.is_empty()
    }
}

/// 条件树节点：叶子条件或嵌套子树
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConditionNode {
    Leaf(Condition),
    Tree(ConditionTree),
}

impl ConditionNode {
    /// 先按叶子条件解析，失败再按子树解析
    pub fn from_value(value: Value) -> Result<Self, RuleError> {
        if let Ok(condition) = serde_json::from_value::<Condition>(value.clone()) {
            return Ok(Self::Leaf(condition));
        }

        serde_json::from_value::<ConditionTree>(value)
            .map(Self::Tree)
            .map_err(|e| RuleError::InvalidNode(e.to_string()))
    }
}

impl<'de> Deserialize<'de> for ConditionNode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

impl From<Condition> for ConditionNode {
    fn from(condition: Condition) -> Self {
        Self::Leaf(condition)
    }
}

impl From<ConditionTree> for ConditionNode {
    fn from(tree: ConditionTree) -> Self {
        Self::Tree(tree)
    }
}

/// 单个条件的评估结果，保留审计所需的全部细节
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionResult {
    pub fact: String,
    pub operator: String,
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub fact_value: Value,
    pub result: bool,
}

/// 条件树的评估结果
///
/// 各组只包含实际评估过的子节点，短路后未评估的节点不出现。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TreeResult {
    pub result: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub all: Vec<NodeResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub any: Vec<NodeResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub none: Vec<NodeResult>,
}

impl TreeResult {
    /// 按评估顺序收集所有叶子结果
    pub fn leaves(&self) -> Vec<&ConditionResult> {
        let mut out = Vec::new();
        for node in self.all.iter().chain(&self.any).chain(&self.none) {
            match node {
                NodeResult::Condition(c) => out.push(c),
                NodeResult::Tree(t) => out.extend(t.leaves()),
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeResult {
    Condition(ConditionResult),
    Tree(TreeResult),
}

impl NodeResult {
    pub fn result(&self) -> bool {
        match self {
            Self::Condition(c) => c.result,
            Self::Tree(t) => t.result,
        }
    }
}
