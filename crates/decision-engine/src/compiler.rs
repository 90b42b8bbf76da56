//! 规则编译器
//!
//! 规则注册时一次性完成：结构校验、收集依赖的事实名、为每个条件和子树预计算缓存键。
//! 缓存键基于按键排序的规范化 JSON，结构相同的条件在不同规则之间得到相同的键。

use crate::error::RuleError;
use crate::models::{Condition, ConditionNode, ConditionTree, Rule};
use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

/// 递归按键排序，得到与字段顺序无关的规范形式
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// 规范化 JSON 字符串
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn digest_key(prefix: &str, value: &Value) -> Result<String, RuleError> {
    let bytes = serde_json::to_vec(&canonicalize(value))?;
    Ok(format!("{}:{:x}", prefix, Sha256::digest(&bytes)))
}

/// 条件的缓存键：事实、操作符、比较值、路径、参数
pub fn condition_key(condition: &Condition) -> Result<String, RuleError> {
    digest_key(
        "cond",
        &json!({
            "fact": condition.fact,
            "operator": condition.operator,
            "value": condition.value,
            "path": condition.path,
            "params": condition.params,
        }),
    )
}

/// 编译后的条件
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCondition {
    pub condition: Condition,
    pub cache_key: String,
}

/// 编译后的节点
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledNode {
    Leaf(CompiledCondition),
    Tree(CompiledTree),
}

impl CompiledNode {
    pub fn cache_key(&self) -> &str {
        match self {
            Self::Leaf(c) => &c.cache_key,
            Self::Tree(t) => &t.cache_key,
        }
    }
}

/// 编译后的条件树
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CompiledTree {
    pub all: Vec<CompiledNode>,
    pub any: Vec<CompiledNode>,
    pub none: Vec<CompiledNode>,
    pub cache_key: String,
}

impl CompiledTree {
    /// 编译条件树：校验每个节点并计算缓存键
    pub fn compile(tree: &ConditionTree) -> Result<Self, RuleError> {
        Self::compile_at(tree, "conditions")
    }

    fn compile_at(tree: &ConditionTree, path: &str) -> Result<Self, RuleError> {
        let all = compile_group(&tree.all, &format!("{}.all", path))?;
        let any = compile_group(&tree.any, &format!("{}.any", path))?;
        let none = compile_group(&tree.none, &format!("{}.none", path))?;

        let keys = |nodes: &[CompiledNode]| -> Vec<String> {
            nodes.iter().map(|n| n.cache_key().to_string()).collect()
        };
        let cache_key = digest_key(
            "tree",
            &json!({ "all": keys(&all), "any": keys(&any), "none": keys(&none) }),
        )?;

        Ok(Self {
            all,
            any,
            none,
            cache_key,
        })
    }

    /// 收集树中引用的所有事实名
    pub fn collect_facts(&self, facts: &mut BTreeSet<String>) {
        for node in self.all.iter().chain(&self.any).chain(&self.none) {
            match node {
                CompiledNode::Leaf(c) => {
                    facts.insert(c.condition.fact.clone());
                }
                CompiledNode::Tree(t) => t.collect_facts(facts),
            }
        }
    }
}

fn compile_group(nodes: &[ConditionNode], path: &str) -> Result<Vec<CompiledNode>, RuleError> {
    nodes
        .iter()
        .enumerate()
        .map(|(i, node)| {
            let node_path = format!("{}[{}]", path, i);
            match node {
                ConditionNode::Leaf(condition) => {
                    validate_condition(condition, &node_path)?;
                    Ok(CompiledNode::Leaf(CompiledCondition {
                        cache_key: condition_key(condition)?,
                        condition: condition.clone(),
                    }))
                }
                ConditionNode::Tree(tree) => {
                    CompiledTree::compile_at(tree, &node_path).map(CompiledNode::Tree)
                }
            }
        })
        .collect()
}

fn validate_condition(condition: &Condition, path: &str) -> Result<(), RuleError> {
    if condition.fact.is_empty() {
        return Err(RuleError::InvalidNode(format!("条件 '{}' 的事实名不能为空", path)));
    }
    if condition.operator.is_empty() {
        return Err(RuleError::InvalidNode(format!("条件 '{}' 的操作符不能为空", path)));
    }
    Ok(())
}

/// 编译后的规则
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// 原始规则
    pub rule: Rule,
    pub tree: CompiledTree,
    /// 规则依赖的事实名（用于依赖跳过）
    pub required_facts: BTreeSet<String>,
    /// 编译版本号
    pub compile_version: u64,
}

impl CompiledRule {
    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn priority(&self) -> i32 {
        self.rule.priority
    }
}

/// 规则编译器
pub struct RuleCompiler {
    compile_version: u64,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self { compile_version: 0 }
    }

    /// 从 JSON 字符串编译规则
    pub fn compile_from_json(&mut self, json: &str) -> Result<CompiledRule, RuleError> {
        let rule = Rule::from_json(json)?;
        self.compile(rule)
    }

    /// 编译规则
    pub fn compile(&mut self, rule: Rule) -> Result<CompiledRule, RuleError> {
        if rule.name.is_empty() {
            return Err(RuleError::Malformed("规则名称不能为空".to_string()));
        }
        for outcome in rule.on_success.iter().chain(&rule.on_failure) {
            if outcome.name.is_empty() {
                return Err(RuleError::Malformed(format!(
                    "规则 '{}' 引用的结果名称不能为空",
                    rule.name
                )));
            }
        }

        let tree = CompiledTree::compile(&rule.conditions)?;
        let mut required_facts = BTreeSet::new();
        tree.collect_facts(&mut required_facts);

        self.compile_version += 1;

        Ok(CompiledRule {
            rule,
            tree,
            required_facts,
            compile_version: self.compile_version,
        })
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}
