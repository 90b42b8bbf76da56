//! 规则结果（事件）
//!
//! 结果是可注册的副作用描述：同步结果阻塞运行并传播错误，
//! 异步结果作为独立的后台任务执行，错误只上报给指标收集器。

use crate::error::OutcomeError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// 结果执行方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeMode {
    /// 在运行中同步执行，错误中止运行
    #[default]
    Sync,
    /// 派发为后台任务，不等待
    Async,
}

/// 一次触发的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeEvent {
    pub outcome: String,
    pub rule: String,
    pub matched: bool,
    /// 规则参数覆盖结果默认参数后的最终参数
    pub params: Map<String, Value>,
}

/// 结果动作
///
/// 既用于单个结果的动作，也用于引擎级的全局处理器。
#[async_trait]
pub trait OutcomeAction: Send + Sync {
    async fn execute(&self, event: &OutcomeEvent) -> Result<(), OutcomeError>;
}

/// 结果描述
#[derive(Clone)]
pub struct Outcome {
    name: String,
    mode: OutcomeMode,
    default_params: Map<String, Value>,
    action: Option<Arc<dyn OutcomeAction>>,
}

impl Outcome {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mode: OutcomeMode::Sync,
            default_params: Map::new(),
            action: None,
        }
    }

    pub fn with_mode(mut self, mode: OutcomeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default_params.insert(key.into(), value.into());
        self
    }

    pub fn with_action(mut self, action: Arc<dyn OutcomeAction>) -> Self {
        self.action = Some(action);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> OutcomeMode {
        self.mode
    }

    pub fn action(&self) -> Option<&Arc<dyn OutcomeAction>> {
        self.action.as_ref()
    }

    /// 合并参数，规则上的同名参数优先
    pub fn merge_params(&self, overrides: &Map<String, Value>) -> Map<String, Value> {
        let mut params = self.default_params.clone();
        for (key, value) in overrides {
            params.insert(key.clone(), value.clone());
        }
        params
    }

    /// 构建该结果的一次触发事件
    pub fn event(&self, rule: &str, matched: bool, overrides: &Map<String, Value>) -> OutcomeEvent {
        OutcomeEvent {
            outcome: self.name.clone(),
            rule: rule.to_string(),
            matched,
            params: self.merge_params(overrides),
        }
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outcome")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("default_params", &self.default_params)
            .field("has_action", &self.action.is_some())
            .finish()
    }
}

/// 结果注册表
#[derive(Clone, Default)]
pub struct OutcomeRegistry {
    outcomes: Arc<DashMap<String, Outcome>>,
}

impl OutcomeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册结果，同名覆盖
    pub fn register(&self, outcome: Outcome) {
        debug!(outcome = outcome.name(), mode = ?outcome.mode(), "注册结果");
        self.outcomes.insert(outcome.name().to_string(), outcome);
    }

    pub fn get(&self, name: &str) -> Option<Outcome> {
        self.outcomes.get(name).map(|o| o.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.outcomes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// 由闭包构成的结果动作
pub struct FnAction<F>(pub F);

#[async_trait]
impl<F> OutcomeAction for FnAction<F>
where
    F: Fn(&OutcomeEvent) -> Result<(), OutcomeError> + Send + Sync,
{
    async fn execute(&self, event: &OutcomeEvent) -> Result<(), OutcomeError> {
        (self.0)(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_params_rule_wins() {
        let outcome = Outcome::new("discount")
            .with_default("percent", 5)
            .with_default("currency", "EUR");

        let mut overrides = Map::new();
        overrides.insert("percent".to_string(), json!(15));

        let params = outcome.merge_params(&overrides);
        assert_eq!(params.get("percent"), Some(&json!(15)));
        assert_eq!(params.get("currency"), Some(&json!("EUR")));
    }

    #[test]
    fn test_event() {
        let outcome = Outcome::new("notify").with_mode(OutcomeMode::Async);
        let event = outcome.event("adult", false, &Map::new());
        assert_eq!(event.outcome, "notify");
        assert_eq!(event.rule, "adult");
        assert!(!event.matched);
        assert_eq!(outcome.mode(), OutcomeMode::Async);
    }

    #[test]
    fn test_registry() {
        let registry = OutcomeRegistry::new();
        registry.register(Outcome::new("a"));
        registry.register(Outcome::new("a").with_default("x", 1));

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("a"));
        assert!(registry.get("b").is_none());
    }

    #[tokio::test]
    async fn test_fn_action() {
        let action = FnAction(|event: &OutcomeEvent| {
            if event.matched {
                Ok(())
            } else {
                Err(OutcomeError::action(&event.outcome, "not matched"))
            }
        });

        let outcome = Outcome::new("check");
        assert!(action.execute(&outcome.event("r", true, &Map::new())).await.is_ok());
        assert!(action.execute(&outcome.event("r", false, &Map::new())).await.is_err());
    }
}
