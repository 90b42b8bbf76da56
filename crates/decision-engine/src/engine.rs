//! 规则引擎
//!
//! 一次运行的流程：排序 → 评估（顺序或并行）→ 分发结果 → 汇总报告。
//!
//! 并行模式只加速评估本身；结果分发总是在全部评估完成后按排序顺序重放，
//! 因此与顺序模式触发的副作用顺序一致。
//!
//! 规则结果和事件在整次运行成功后才写入 Almanac，运行失败时两种模式都不留下记录。

use crate::almanac::Almanac;
use crate::compiler::CompiledRule;
use crate::config::{EngineConfig, SortOrder};
use crate::error::{ConditionError, EngineError, OutcomeError, Result};
use crate::fact::Fact;
use crate::metrics::MetricsSink;
use crate::models::Rule;
use crate::operators::{Operator, OperatorRegistry};
use crate::outcome::{Outcome, OutcomeAction, OutcomeEvent, OutcomeMode, OutcomeRegistry};
use crate::report::{DecisionResponse, RuleResult, RunReport};
use crate::store::RuleStore;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// 规则引擎
pub struct Engine {
    config: EngineConfig,
    store: RuleStore,
    operators: OperatorRegistry,
    outcomes: OutcomeRegistry,
    /// 每个同步结果执行完动作后调用的全局处理器
    handler: Option<Arc<dyn OutcomeAction>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    /// 引擎级事实，复制到 `new_almanac` 创建的每个 Almanac
    facts: DashMap<String, Fact>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            store: RuleStore::new(),
            operators: OperatorRegistry::with_defaults(),
            outcomes: OutcomeRegistry::new(),
            handler: None,
            metrics: None,
            facts: DashMap::new(),
        }
    }

    /// 使用共享的操作符注册表
    pub fn with_operators(mut self, operators: OperatorRegistry) -> Self {
        self.operators = operators;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_handler(mut self, handler: Arc<dyn OutcomeAction>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn set_handler(&mut self, handler: Arc<dyn OutcomeAction>) {
        self.handler = Some(handler);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 规则存储；克隆后可交给重载器
    pub fn store(&self) -> &RuleStore {
        &self.store
    }

    pub fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }

    pub fn outcomes(&self) -> &OutcomeRegistry {
        &self.outcomes
    }

    pub fn add_rule(&self, rule: Rule) -> Result<()> {
        self.store.add_rule(rule)
    }

    pub fn add_rules(&self, rules: Vec<Rule>) -> Result<()> {
        self.store.add_rules(rules)
    }

    pub fn add_rule_json(&self, json: &str) -> Result<String> {
        self.store.add_rule_json(json)
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        self.store.remove_rule(name)
    }

    pub fn replace_rules(&self, rules: Vec<Rule>) -> Result<usize> {
        self.store.replace_rules(rules)
    }

    pub fn rules(&self) -> Vec<Rule> {
        self.store.rules()
    }

    pub fn register_outcome(&self, outcome: Outcome) {
        self.outcomes.register(outcome);
    }

    pub fn register_operator(&self, name: impl Into<String>, operator: impl Operator + 'static) {
        self.operators.register(name, operator);
    }

    /// 注册引擎级事实，同名覆盖
    pub fn add_fact(&self, fact: Fact) {
        debug!(fact = fact.name(), "注册引擎级事实");
        self.facts.insert(fact.name().to_string(), fact);
    }

    /// 按引擎配置创建 Almanac，并带上所有引擎级事实
    pub fn new_almanac(&self) -> Almanac {
        let almanac = Almanac::new(self.config.almanac_options());
        for entry in self.facts.iter() {
            almanac.add_fact(entry.value().clone());
        }
        almanac
    }

    /// 执行一次运行
    pub async fn run(&self, almanac: Arc<Almanac>) -> Result<RunReport> {
        let rules = self.sorted_rules();
        self.run_rules(&rules, &almanac).await
    }

    /// 运行并汇总为决策响应
    pub async fn decide(&self, almanac: Arc<Almanac>) -> Result<DecisionResponse> {
        let rules = self.sorted_rules();
        let report = self.run_rules(&rules, &almanac).await?;

        let referenced: BTreeSet<String> = rules
            .iter()
            .flat_map(|rule| rule.required_facts.iter().cloned())
            .collect();
        let fact_metadata: BTreeMap<_, _> = referenced
            .into_iter()
            .filter_map(|name| almanac.fact_metadata(&name).map(|meta| (name, meta)))
            .collect();

        Ok(DecisionResponse::from_report(&report, fact_metadata))
    }

    #[instrument(skip_all, fields(rules = rules.len(), parallel = self.config.is_parallel()))]
    async fn run_rules(
        &self,
        rules: &[Arc<CompiledRule>],
        almanac: &Arc<Almanac>,
    ) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        let mut results = Vec::with_capacity(rules.len());
        let mut events = Vec::new();

        if self.config.is_parallel() {
            let evaluated = self.evaluate_parallel(rules, almanac).await?;
            for (rule, result) in rules.iter().zip(evaluated) {
                events.extend(self.dispatch(rule, &result).await?);
                results.push(result);
            }
        } else {
            for rule in rules {
                let result = evaluate_rule(rule, almanac, &self.operators, &self.config)
                    .map_err(|source| EngineError::Evaluation {
                        rule: rule.name().to_string(),
                        source,
                    })?;
                self.observe_rule(&result);
                events.extend(self.dispatch(rule, &result).await?);
                results.push(result);
            }
        }

        for result in &results {
            almanac.record_result(result.clone());
        }
        for event in &events {
            almanac.record_event(event.clone());
        }

        let duration = start.elapsed();
        if let Some(metrics) = &self.metrics {
            metrics.run_completed(rules.len(), duration);
        }
        info!(
            %run_id,
            matched = results.iter().filter(|r| r.matched).count(),
            duration_us = duration.as_micros() as u64,
            "运行完成"
        );

        Ok(RunReport {
            run_id,
            started_at,
            duration,
            results,
            events,
        })
    }

    fn sorted_rules(&self) -> Vec<Arc<CompiledRule>> {
        let mut rules: Vec<Arc<CompiledRule>> = self.store.snapshot().iter().cloned().collect();
        match self.config.sort {
            SortOrder::PriorityDesc => rules.sort_by(|a, b| b.priority().cmp(&a.priority())),
            SortOrder::PriorityAsc => rules.sort_by_key(|r| r.priority()),
            SortOrder::Insertion => {}
        }
        rules
    }

    /// 并行评估；等待全部完成后返回排序靠前的第一个错误
    async fn evaluate_parallel(
        &self,
        rules: &[Arc<CompiledRule>],
        almanac: &Arc<Almanac>,
    ) -> Result<Vec<RuleResult>> {
        let semaphore = Arc::new(Semaphore::new(self.config.worker_count()));
        let mut handles = Vec::with_capacity(rules.len());

        for rule in rules {
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| EngineError::Worker {
                    rule: rule.name().to_string(),
                    message: e.to_string(),
                })?;

            let rule = rule.clone();
            let almanac = almanac.clone();
            let operators = self.operators.clone();
            let config = self.config.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                evaluate_rule(&rule, &almanac, &operators, &config)
            }));
        }

        let mut outcomes = Vec::with_capacity(handles.len());
        for (rule, handle) in rules.iter().zip(handles) {
            outcomes.push((rule, handle.await));
        }

        let mut results = Vec::with_capacity(outcomes.len());
        for (rule, joined) in outcomes {
            let result = match joined {
                Ok(Ok(result)) => result,
                Ok(Err(source)) => {
                    return Err(EngineError::Evaluation {
                        rule: rule.name().to_string(),
                        source,
                    });
                }
                Err(e) => {
                    return Err(EngineError::Worker {
                        rule: rule.name().to_string(),
                        message: e.to_string(),
                    });
                }
            };
            results.push(result);
        }

        for result in &results {
            self.observe_rule(result);
        }
        Ok(results)
    }

    fn observe_rule(&self, result: &RuleResult) {
        debug!(
            rule = %result.rule,
            matched = result.matched,
            skipped = result.skipped,
            "规则评估完成"
        );
        if let Some(metrics) = &self.metrics {
            metrics.rule_evaluated(&result.rule, result.matched, result.duration);
        }
    }

    /// 分发一条规则的结果，返回触发的事件
    async fn dispatch(&self, rule: &CompiledRule, result: &RuleResult) -> Result<Vec<OutcomeEvent>> {
        let refs = if result.matched {
            &rule.rule.on_success
        } else {
            &rule.rule.on_failure
        };

        let mut events = Vec::with_capacity(refs.len());
        for outcome_ref in refs {
            let Some(outcome) = self.outcomes.get(&outcome_ref.name) else {
                warn!(rule = rule.name(), outcome = %outcome_ref.name, "结果未注册，已忽略");
                continue;
            };

            let event = outcome.event(rule.name(), result.matched, &outcome_ref.params);
            let start = Instant::now();
            match outcome.mode() {
                OutcomeMode::Sync => {
                    run_actions(outcome.action().cloned(), self.handler.clone(), &event)
                        .await
                        .map_err(|source| EngineError::Outcome {
                            rule: rule.name().to_string(),
                            source,
                        })?;
                }
                OutcomeMode::Async => {
                    let action = outcome.action().cloned();
                    let handler = self.handler.clone();
                    let metrics = self.metrics.clone();
                    let event = event.clone();
                    tokio::spawn(async move {
                        if let Err(e) = run_actions(action, handler, &event).await {
                            warn!(
                                rule = %event.rule,
                                outcome = %event.outcome,
                                error = %e,
                                "异步结果执行失败"
                            );
                            if let Some(metrics) = metrics {
                                metrics.outcome_failed(&event.outcome, &event.rule, &e.to_string());
                            }
                        }
                    });
                }
            }

            if let Some(metrics) = &self.metrics {
                metrics.outcome_dispatched(&event.outcome, &event.rule, event.matched, start.elapsed());
            }
            events.push(event);
        }
        Ok(events)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// 先执行结果自身的动作，再执行全局处理器
async fn run_actions(
    action: Option<Arc<dyn OutcomeAction>>,
    handler: Option<Arc<dyn OutcomeAction>>,
    event: &OutcomeEvent,
) -> std::result::Result<(), OutcomeError> {
    if let Some(action) = action {
        action.execute(event).await?;
    }
    if let Some(handler) = handler {
        handler
            .execute(event)
            .await
            .map_err(|e| OutcomeError::Handler {
                outcome: event.outcome.clone(),
                message: e.to_string(),
            })?;
    }
    Ok(())
}

/// 评估单条规则（可在阻塞线程上执行）
fn evaluate_rule(
    rule: &CompiledRule,
    almanac: &Almanac,
    operators: &OperatorRegistry,
    config: &EngineConfig,
) -> std::result::Result<RuleResult, ConditionError> {
    let start = Instant::now();

    if config.smart_skip {
        if let Some(missing) = rule.required_facts.iter().find(|f| !almanac.has_fact(f)) {
            debug!(rule = rule.name(), fact = %missing, "缺少依赖事实，跳过规则");
            return Ok(RuleResult {
                rule: rule.name().to_string(),
                priority: rule.priority(),
                matched: false,
                skipped: true,
                detail: None,
                duration: start.elapsed(),
            });
        }
    }

    let tree = rule.tree.evaluate(almanac, operators)?;
    Ok(RuleResult {
        rule: rule.name().to_string(),
        priority: rule.priority(),
        matched: tree.result,
        skipped: false,
        detail: config.audit.then_some(tree),
        duration: start.elapsed(),
    })
}
