//! 条件树执行器
//!
//! 在 Almanac 上对编译后的条件树做短路求值：
//! - all：遇到第一个不满足的子节点即为 false
//! - any：遇到第一个满足的子节点即为 true
//! - none：遇到第一个满足的子节点即为 false
//!
//! 启用条件缓存时，先查缓存再计算；并在每组求值前把已命中缓存的子节点排到前面，
//! 未命中的子节点保持原有相对顺序。

use crate::almanac::Almanac;
use crate::compiler::{CompiledCondition, CompiledNode, CompiledTree};
use crate::error::ConditionError;
use crate::models::{ConditionResult, NodeResult, TreeResult};
use crate::operators::OperatorRegistry;
use tracing::trace;

#[derive(Debug, Clone, Copy)]
enum Group {
    All,
    Any,
    None,
}

/// 条件树执行器
pub struct TreeExecutor<'a> {
    almanac: &'a Almanac,
    operators: &'a OperatorRegistry,
}

impl<'a> TreeExecutor<'a> {
    pub fn new(almanac: &'a Almanac, operators: &'a OperatorRegistry) -> Self {
        Self { almanac, operators }
    }

    /// 评估单个条件
    pub fn evaluate_condition(
        &self,
        compiled: &CompiledCondition,
    ) -> Result<ConditionResult, ConditionError> {
        let caching = self.almanac.cache_conditions();
        if caching {
            if let Some(NodeResult::Condition(cached)) =
                self.almanac.cached_condition(&compiled.cache_key)
            {
                trace!(fact = %compiled.condition.fact, "条件缓存命中");
                return Ok(cached);
            }
        }

        let condition = &compiled.condition;
        let fact_value = self
            .almanac
            .fact_value(&condition.fact, &condition.params, condition.path.as_deref())
            .map_err(|source| ConditionError::Fact {
                fact: condition.fact.clone(),
                operator: condition.operator.clone(),
                source,
            })?;

        let matched = self
            .operators
            .evaluate(&condition.operator, &fact_value, &condition.value)?;

        let result = ConditionResult {
            fact: condition.fact.clone(),
            operator: condition.operator.clone(),
            value: condition.value.clone(),
            path: condition.path.clone(),
            fact_value,
            result: matched,
        };

        if caching {
            self.almanac
                .cache_condition(compiled.cache_key.clone(), NodeResult::Condition(result.clone()));
        }

        Ok(result)
    }

    /// 评估条件树
    pub fn evaluate_tree(&self, tree: &CompiledTree) -> Result<TreeResult, ConditionError> {
        let caching = self.almanac.cache_conditions();
        if caching {
            if let Some(NodeResult::Tree(cached)) = self.almanac.cached_condition(&tree.cache_key) {
                trace!(key = %tree.cache_key, "子树缓存命中");
                return Ok(cached);
            }
        }

        let mut result = TreeResult {
            result: true,
            ..Default::default()
        };

        for (group, children) in [
            (Group::All, &tree.all),
            (Group::Any, &tree.any),
            (Group::None, &tree.none),
        ] {
            let (satisfied, evaluated) = self.evaluate_group(group, children)?;
            match group {
                Group::All => result.all = evaluated,
                Group::Any => result.any = evaluated,
                Group::None => result.none = evaluated,
            }
            if !satisfied {
                result.result = false;
                break;
            }
        }

        if caching {
            self.almanac
                .cache_condition(tree.cache_key.clone(), NodeResult::Tree(result.clone()));
        }

        Ok(result)
    }

    fn evaluate_node(&self, node: &CompiledNode) -> Result<NodeResult, ConditionError> {
        match node {
            CompiledNode::Leaf(c) => self.evaluate_condition(c).map(NodeResult::Condition),
            CompiledNode::Tree(t) => self.evaluate_tree(t).map(NodeResult::Tree),
        }
    }

    fn evaluate_group(
        &self,
        group: Group,
        children: &[CompiledNode],
    ) -> Result<(bool, Vec<NodeResult>), ConditionError> {
        if children.is_empty() {
            return Ok((true, Vec::new()));
        }

        let ordered = self.order_children(children);
        let mut evaluated = Vec::with_capacity(ordered.len());

        for child in ordered {
            let node = self.evaluate_node(child)?;
            let passed = node.result();
            evaluated.push(node);

            match group {
                Group::All if !passed => return Ok((false, evaluated)),
                Group::Any if passed => return Ok((true, evaluated)),
                Group::None if passed => return Ok((false, evaluated)),
                _ => {}
            }
        }

        let satisfied = match group {
            Group::All | Group::None => true,
            Group::Any => false,
        };
        Ok((satisfied, evaluated))
    }

    /// 缓存命中的子节点优先；未启用缓存时保持原顺序
    fn order_children<'n>(&self, children: &'n [CompiledNode]) -> Vec<&'n CompiledNode> {
        if !self.almanac.cache_conditions() {
            return children.iter().collect();
        }

        let (mut hits, misses): (Vec<&CompiledNode>, Vec<&CompiledNode>) = children
            .iter()
            .partition(|child| self.almanac.has_cached_condition(child.cache_key()));
        hits.extend(misses);
        hits
    }
}

impl CompiledTree {
    /// 在给定的 Almanac 上评估
    pub fn evaluate(
        &self,
        almanac: &Almanac,
        operators: &OperatorRegistry,
    ) -> Result<TreeResult, ConditionError> {
        TreeExecutor::new(almanac, operators).evaluate_tree(self)
    }
}

impl CompiledCondition {
    pub fn evaluate(
        &self,
        almanac: &Almanac,
        operators: &OperatorRegistry,
    ) -> Result<ConditionResult, ConditionError> {
        TreeExecutor::new(almanac, operators).evaluate_condition(self)
    }
}
