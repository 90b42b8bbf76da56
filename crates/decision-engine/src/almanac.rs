//! 事实存储（Almanac）
//!
//! 一次评估运行的全部共享状态：事实表、事实值缓存、条件结果缓存、
//! 以及本次运行记录下来的规则结果和触发的事件。
//! 所有状态放在同一把读写锁后面，读（查事实、读缓存）可并发，写互斥。
//!
//! 条件结果缓存依赖事实值：任何事实的注册或覆盖都会清空它。

use crate::error::AlmanacError;
use crate::fact::{Fact, FactParams};
use crate::models::NodeResult;
use crate::outcome::OutcomeEvent;
use crate::path;
use crate::report::RuleResult;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Almanac 选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlmanacOptions {
    /// 为 true 时未定义的事实解析为 null，否则报错
    pub allow_undefined_facts: bool,
    /// 是否启用条件结果缓存
    pub cache_conditions: bool,
}

impl Default for AlmanacOptions {
    fn default() -> Self {
        Self {
            allow_undefined_facts: true,
            cache_conditions: false,
        }
    }
}

#[derive(Default)]
struct AlmanacState {
    facts: HashMap<String, Arc<Fact>>,
    /// 事实名 → 参数键 → 值
    fact_cache: HashMap<String, HashMap<String, Value>>,
    condition_cache: HashMap<String, NodeResult>,
    success_events: Vec<OutcomeEvent>,
    failure_events: Vec<OutcomeEvent>,
    results: Vec<RuleResult>,
}

/// 事实存储
pub struct Almanac {
    options: AlmanacOptions,
    state: RwLock<AlmanacState>,
}

impl Almanac {
    pub fn new(options: AlmanacOptions) -> Self {
        Self {
            options,
            state: RwLock::new(AlmanacState::default()),
        }
    }

    /// 以一组常量事实创建
    pub fn from_values<I, K>(values: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let almanac = Self::default();
        for (name, value) in values {
            almanac.add_fact(Fact::constant(name, value));
        }
        almanac
    }

    pub fn options(&self) -> AlmanacOptions {
        self.options
    }

    pub fn cache_conditions(&self) -> bool {
        self.options.cache_conditions
    }

    /// 注册或覆盖事实
    ///
    /// 覆盖时清除该事实的旧缓存，并清空条件结果缓存；
    /// 启用缓存的常量事实立即写入缓存，动态事实只在首次求值时计算。
    pub fn add_fact(&self, fact: Fact) {
        let mut state = self.state.write();

        state.fact_cache.remove(fact.name());
        if !state.condition_cache.is_empty() {
            trace!(fact = fact.name(), entries = state.condition_cache.len(), "清空条件结果缓存");
            state.condition_cache.clear();
        }
        if fact.cache_enabled() && !fact.is_dynamic() {
            if let Ok(value) = fact.compute(&FactParams::new()) {
                state
                    .fact_cache
                    .entry(fact.name().to_string())
                    .or_default()
                    .insert(Fact::params_key(&FactParams::new()), value);
            }
        }

        trace!(fact = fact.name(), dynamic = fact.is_dynamic(), "注册事实");
        state.facts.insert(fact.name().to_string(), Arc::new(fact));
    }

    /// 注册常量事实
    pub fn add_value(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.add_fact(Fact::constant(name, value));
    }

    pub fn has_fact(&self, name: &str) -> bool {
        self.state.read().facts.contains_key(name)
    }

    pub fn fact(&self, name: &str) -> Option<Arc<Fact>> {
        self.state.read().facts.get(name).cloned()
    }

    pub fn fact_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.state.read().facts.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn fact_metadata(&self, name: &str) -> Option<Map<String, Value>> {
        self.state
            .read()
            .facts
            .get(name)
            .map(|f| f.metadata().clone())
    }

    /// 解析事实值
    ///
    /// 命中缓存则直接返回；否则计算（计算期间不持有锁），按需写入缓存，
    /// 最后应用嵌套路径。
    pub fn fact_value(
        &self,
        name: &str,
        params: &FactParams,
        path: Option<&str>,
    ) -> Result<Value, AlmanacError> {
        let (fact, cached) = {
            let state = self.state.read();
            match state.facts.get(name) {
                Some(fact) => {
                    let cached = if fact.cache_enabled() {
                        state
                            .fact_cache
                            .get(name)
                            .and_then(|entries| entries.get(&Fact::params_key(params)))
                            .cloned()
                    } else {
                        None
                    };
                    (fact.clone(), cached)
                }
                None if self.options.allow_undefined_facts => {
                    trace!(fact = name, "未定义的事实解析为 null");
                    return Ok(Value::Null);
                }
                None => return Err(AlmanacError::UndefinedFact(name.to_string())),
            }
        };

        let value = match cached {
            Some(value) => value,
            None => {
                let value = fact.compute(params)?;
                if fact.cache_enabled() {
                    self.state
                        .write()
                        .fact_cache
                        .entry(name.to_string())
                        .or_default()
                        .insert(Fact::params_key(params), value.clone());
                }
                value
            }
        };

        match path {
            Some(p) if !p.is_empty() => path::extract(name, &value, p),
            _ => Ok(value),
        }
    }

    pub fn cached_condition(&self, key: &str) -> Option<NodeResult> {
        self.state.read().condition_cache.get(key).cloned()
    }

    pub fn has_cached_condition(&self, key: &str) -> bool {
        self.state.read().condition_cache.contains_key(key)
    }

    pub fn cache_condition(&self, key: impl Into<String>, result: NodeResult) {
        self.state.write().condition_cache.insert(key.into(), result);
    }

    pub(crate) fn record_result(&self, result: RuleResult) {
        self.state.write().results.push(result);
    }

    pub(crate) fn record_event(&self, event: OutcomeEvent) {
        let mut state = self.state.write();
        if event.matched {
            state.success_events.push(event);
        } else {
            state.failure_events.push(event);
        }
    }

    /// 已记录的规则结果（按分发顺序）
    pub fn rule_results(&self) -> Vec<RuleResult> {
        self.state.read().results.clone()
    }

    /// 规则匹配后触发的事件
    pub fn success_events(&self) -> Vec<OutcomeEvent> {
        self.state.read().success_events.clone()
    }

    /// 规则未匹配触发的事件
    pub fn failure_events(&self) -> Vec<OutcomeEvent> {
        self.state.read().failure_events.clone()
    }
}

impl Default for Almanac {
    fn default() -> Self {
        Self::new(AlmanacOptions::default())
    }
}
