//! 操作符注册表
//!
//! 操作符名 → 比较实现。注册表归属于引擎实例，可在运行时追加自定义操作符。
//! 数值操作符把所有数字统一转为 f64 比较；相等判断只在同类型操作数之间成立。

use crate::error::OperatorError;
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

pub const EQUAL: &str = "equal";
pub const NOT_EQUAL: &str = "not_equal";
pub const LESS_THAN: &str = "less_than";
pub const LESS_THAN_INCLUSIVE: &str = "less_than_inclusive";
pub const GREATER_THAN: &str = "greater_than";
pub const GREATER_THAN_INCLUSIVE: &str = "greater_than_inclusive";
pub const IN: &str = "in";
pub const NOT_IN: &str = "not_in";
pub const CONTAINS: &str = "contains";
pub const NOT_CONTAINS: &str = "not_contains";
pub const REGEX: &str = "regex";
pub const STARTS_WITH: &str = "starts_with";
pub const ENDS_WITH: &str = "ends_with";

/// 比较操作符
pub trait Operator: Send + Sync {
    /// `fact_value` 来自事实，`compare_value` 来自条件定义
    fn compare(&self, fact_value: &Value, compare_value: &Value) -> Result<bool, OperatorError>;
}

impl<F> Operator for F
where
    F: Fn(&Value, &Value) -> Result<bool, OperatorError> + Send + Sync,
{
    fn compare(&self, fact_value: &Value, compare_value: &Value) -> Result<bool, OperatorError> {
        self(fact_value, compare_value)
    }
}

/// 操作符注册表
#[derive(Clone)]
pub struct OperatorRegistry {
    operators: Arc<DashMap<String, Arc<dyn Operator>>>,
}

impl OperatorRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            operators: Arc::new(DashMap::new()),
        }
    }

    /// 创建包含全部内置操作符的注册表
    pub fn with_defaults() -> Self {
        let registry = Self::new();

        registry.register(EQUAL, |a: &Value, b: &Value| equal(EQUAL, a, b));
        registry.register(NOT_EQUAL, |a: &Value, b: &Value| {
            equal(NOT_EQUAL, a, b).map(|r| !r)
        });
        registry.register(LESS_THAN, |a: &Value, b: &Value| {
            compare(LESS_THAN, a, b, |x, y| x < y)
        });
        registry.register(LESS_THAN_INCLUSIVE, |a: &Value, b: &Value| {
            compare(LESS_THAN_INCLUSIVE, a, b, |x, y| x <= y)
        });
        registry.register(GREATER_THAN, |a: &Value, b: &Value| {
            compare(GREATER_THAN, a, b, |x, y| x > y)
        });
        registry.register(GREATER_THAN_INCLUSIVE, |a: &Value, b: &Value| {
            compare(GREATER_THAN_INCLUSIVE, a, b, |x, y| x >= y)
        });
        registry.register(IN, |a: &Value, b: &Value| in_list(IN, a, b));
        registry.register(NOT_IN, |a: &Value, b: &Value| in_list(NOT_IN, a, b).map(|r| !r));
        registry.register(CONTAINS, |a: &Value, b: &Value| contains(CONTAINS, a, b));
        registry.register(NOT_CONTAINS, |a: &Value, b: &Value| {
            contains(NOT_CONTAINS, a, b).map(|r| !r)
        });
        registry.register(STARTS_WITH, |a: &Value, b: &Value| {
            affix(STARTS_WITH, a, b, |s, p| s.starts_with(p))
        });
        registry.register(ENDS_WITH, |a: &Value, b: &Value| {
            affix(ENDS_WITH, a, b, |s, p| s.ends_with(p))
        });
        registry.register(REGEX, RegexOperator::default());

        debug!(count = registry.len(), "内置操作符注册完成");
        registry
    }

    /// 注册操作符，同名覆盖
    pub fn register(&self, name: impl Into<String>, operator: impl Operator + 'static) -> &Self {
        self.operators.insert(name.into(), Arc::new(operator));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Operator>> {
        self.operators.get(name).map(|op| op.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operators.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.operators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators.is_empty()
    }

    /// 查找并执行操作符
    pub fn evaluate(
        &self,
        name: &str,
        fact_value: &Value,
        compare_value: &Value,
    ) -> Result<bool, OperatorError> {
        let operator = self.get(name).ok_or_else(|| OperatorError::NotFound {
            operator: name.to_string(),
            fact_value: fact_value.clone(),
            compare_value: compare_value.clone(),
        })?;
        operator.compare(fact_value, compare_value)
    }
}

impl Default for OperatorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// 正则匹配，已编译的模式按字符串缓存
#[derive(Default)]
pub struct RegexOperator {
    compiled: DashMap<String, Regex>,
}

impl Operator for RegexOperator {
    fn compare(&self, fact_value: &Value, compare_value: &Value) -> Result<bool, OperatorError> {
        let s = fact_value
            .as_str()
            .ok_or_else(|| OperatorError::type_mismatch(REGEX, "string", fact_value))?;
        let pattern = compare_value.as_str().ok_or_else(|| {
            OperatorError::type_mismatch(REGEX, "string (regex pattern)", compare_value)
        })?;

        if let Some(regex) = self.compiled.get(pattern) {
            return Ok(regex.is_match(s));
        }

        let regex = Regex::new(pattern).map_err(|e| OperatorError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        let matched = regex.is_match(s);
        self.compiled.insert(pattern.to_string(), regex);
        Ok(matched)
    }
}

/// 相等比较：数字统一为 f64，其余类型要求完全相同
fn equal(op: &str, fact: &Value, expected: &Value) -> Result<bool, OperatorError> {
    if fact.is_null() || expected.is_null() {
        return Err(OperatorError::NilOperand {
            operator: op.to_string(),
        });
    }
    Ok(same_type_eq(fact, expected))
}

fn same_type_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Bool(_), Value::Bool(_))
        | (Value::String(_), Value::String(_))
        | (Value::Array(_), Value::Array(_))
        | (Value::Object(_), Value::Object(_))
        | (Value::Null, Value::Null) => a == b,
        _ => false,
    }
}

/// 数值比较
fn compare<F>(op: &str, fact: &Value, expected: &Value, cmp: F) -> Result<bool, OperatorError>
where
    F: Fn(f64, f64) -> bool,
{
    let a = as_f64(fact).ok_or_else(|| OperatorError::type_mismatch(op, "number", fact))?;
    let b = as_f64(expected).ok_or_else(|| OperatorError::type_mismatch(op, "number", expected))?;
    Ok(cmp(a, b))
}

/// 集合成员检查，比较值必须是数组
fn in_list(op: &str, fact: &Value, expected: &Value) -> Result<bool, OperatorError> {
    if fact.is_null() {
        return Err(OperatorError::NilOperand {
            operator: op.to_string(),
        });
    }
    let arr = expected
        .as_array()
        .ok_or_else(|| OperatorError::type_mismatch(op, "array", expected))?;
    Ok(arr.iter().any(|item| same_type_eq(fact, item)))
}

/// 字符串子串或数组元素包含
fn contains(op: &str, fact: &Value, expected: &Value) -> Result<bool, OperatorError> {
    match fact {
        Value::String(s) => {
            let substr = expected
                .as_str()
                .ok_or_else(|| OperatorError::type_mismatch(op, "string", expected))?;
            Ok(s.contains(substr))
        }
        Value::Array(arr) => Ok(arr.iter().any(|item| same_type_eq(item, expected))),
        _ => Err(OperatorError::type_mismatch(op, "string or array", fact)),
    }
}

fn affix<F>(op: &str, fact: &Value, expected: &Value, check: F) -> Result<bool, OperatorError>
where
    F: Fn(&str, &str) -> bool,
{
    let s = fact
        .as_str()
        .ok_or_else(|| OperatorError::type_mismatch(op, "string", fact))?;
    let affix = expected
        .as_str()
        .ok_or_else(|| OperatorError::type_mismatch(op, "string", expected))?;
    Ok(check(s, affix))
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
